mod recv;

pub use recv::RecvBuf;
