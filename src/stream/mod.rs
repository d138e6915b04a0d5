pub mod cursor;
pub mod packet;

pub use cursor::StreamCursor;
pub use packet::{ChannelPacketSource, Packet, PacketSource, SourceItem, StreamError, source_channel};
