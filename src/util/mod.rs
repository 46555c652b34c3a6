pub mod mxid;

pub use mxid::{MatrixId, MxidError, RoomId};
