use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::{CodecError, FrameCodec};
use crate::frame::Frame;

/// A client socket framed with [`FrameCodec`]. Owned by the task serving that client and dropped,
/// closing the socket, when the task ends.
pub struct Connection {
    pub id: Uuid,
    // Data is read from the socket into the read buffer of `Framed`. When a frame is parsed, the
    // corresponding data is removed from the buffer, the rest stays for the next frame.
    framed: Framed<TcpStream, FrameCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Self::with_codec(stream, FrameCodec::default())
    }

    pub fn with_codec(stream: TcpStream, codec: FrameCodec) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            // Allocate the buffer with 4kb of capacity.
            framed: Framed::with_capacity(stream, codec, 4096),
        }
    }

    /// Reads the next frame. Returns `None` when the peer closed the connection cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        self.framed.next().await.transpose()
    }

    /// Writes a frame and flushes it to the socket.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        self.framed.send(frame).await
    }
}
