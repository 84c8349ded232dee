// smartpixl-record: Shared record model and wire formats

//! Record model shared by the Edge and Forge processes: the immutable
//! tracking record, stable header-JSON assembly, the browser fingerprint
//! hash, the length-prefixed pipe frame codec and the fixed pixel body.

pub mod error;
pub mod fingerprint;
pub mod frame;
pub mod gif;
pub mod headers;
pub mod record;

pub use error::{RecordError, RecordResult};
pub use fingerprint::{fingerprint_hash, FingerprintInput};
pub use frame::{encode_frame, read_frame, write_frame, MAX_FRAME_LEN};
pub use gif::TRANSPARENT_GIF;
pub use headers::headers_to_json;
pub use record::{BehaviourFlags, GeoSnapshot, TrackingRecord};
