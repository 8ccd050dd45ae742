//! yEnc binary encoding/decoding for Usenet
//!
//! yEnc is a binary-to-text encoding scheme designed specifically for Usenet.
//! It has only 1-2% overhead compared to 33-40% for Base64.
//!
//! Every article body of a binary posting carries a `=ybegin` line (and for
//! multi-part postings a `=ypart` line) that tells where the decoded bytes of
//! that article sit inside the whole file. The stream layer relies on those
//! offsets to address files by byte position.
//!
//! Reference: http://www.yenc.org/yenc-draft.1.3.txt

pub mod decode;
pub mod encode;
mod params;
pub mod types;

pub use decode::{decode, parse_header};
pub use encode::{PartSpec, encode};
pub use types::{YencBegin, YencDecoded, YencEnd, YencHeader, YencPart};
