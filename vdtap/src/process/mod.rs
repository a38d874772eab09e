/// Row and frame synchronization of the raw sample stream.
///
/// Provides the [`Synchronizer`](sync::Synchronizer), which finds the sync
/// edges in continuous sample data and yields [`RawFrame`](crate::structs::frame::RawFrame)s.
pub mod sync;

/// Phase correction, cropping and palettes.
///
/// Provides the [`FrameDecoder`](decode::FrameDecoder) for turning raw frames
/// into [`DecodedFrame`](decode::DecodedFrame)s.
pub mod decode;

/// The consumer side of a capture session.
pub mod pipeline;
