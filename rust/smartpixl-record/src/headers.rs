// smartpixl-record: Stable header-JSON assembly

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Serialize header (name, value) pairs as a compact JSON object with
/// alphabetically ordered lowercase keys. Repeated headers are joined with
/// ", " so the document stays a flat map and byte-stable for downstream
/// diffing.
pub fn headers_to_json<'a, I>(headers: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut ordered: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        match ordered.entry(name.to_ascii_lowercase()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().push_str(", ");
                existing.get_mut().push_str(value);
            }
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
            }
        }
    }
    // A string map cannot fail to serialize
    serde_json::to_string(&ordered).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_ordered_alphabetically() {
        let json = headers_to_json(vec![
            ("User-Agent", "curl/8.0"),
            ("Accept", "*/*"),
            ("Host", "pixel.example.com"),
        ]);
        assert_eq!(
            json,
            r#"{"accept":"*/*","host":"pixel.example.com","user-agent":"curl/8.0"}"#
        );
    }

    #[test]
    fn test_ordering_is_input_order_independent() {
        let a = headers_to_json(vec![("B", "2"), ("A", "1"), ("C", "3")]);
        let b = headers_to_json(vec![("C", "3"), ("A", "1"), ("B", "2")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_repeated_headers_join() {
        let json = headers_to_json(vec![("Via", "proxy-a"), ("via", "proxy-b")]);
        assert_eq!(json, r#"{"via":"proxy-a, proxy-b"}"#);
    }

    #[test]
    fn test_empty_input_yields_empty_object() {
        assert_eq!(headers_to_json(std::iter::empty()), "{}");
    }
}
