//! Lock-free SPSC ring buffer for audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback. The detection thread
//! drains it one fixed-size frame at a time.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Type alias for the producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half, held by the detection thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Samples per analysed frame. One loudness value is produced per frame.
pub const FRAME_SIZE: usize = 1024;

/// Buffer capacity: 2^16 = 65 536 f32 samples ≈ 1.4 s at 48 kHz.
/// Anything older than that is stale for rep detection anyway; an overrun
/// drops samples, never reps.
pub const RING_CAPACITY: usize = 1 << 16;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
