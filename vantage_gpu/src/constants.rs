/// Frames the CPU is allowed to have in flight at once (spec §4.6).
pub const FRAME_QUEUE_LENGTH: u64 = 2;

/// Default bindless array capacities (spec §4.2.1).
pub const DEFAULT_SAMPLED_IMAGE_CAPACITY: u32 = 1024;
pub const DEFAULT_STORAGE_IMAGE_CAPACITY: u32 = 1024;
pub const DEFAULT_STORAGE_BUFFER_CAPACITY: u32 = 32768;

/// Default per-frame ring-buffer sizes (spec §4.7).
pub const DEFAULT_UNIFORM_RING_SIZE: u64 = 64 * 1024;
pub const DEFAULT_VERTEX_RING_SIZE: u64 = 2 * 1024 * 1024;
pub const DEFAULT_INDEX_RING_SIZE: u64 = 128 * 1024;
pub const DEFAULT_INSTANCE_RING_SIZE: u64 = 64 * 1024 * 1024;

/// Default push-constant range size (spec §6): small enough for a
/// handful of bindless indices, shared verbatim by every program.
pub const DEFAULT_PUSH_CONSTANT_SIZE: u32 = 128;

/// Seconds `Fence::wait` blocks before treating a wait as fatal (spec §4.2).
pub const FENCE_WAIT_TIMEOUT_SECS: u64 = 10;
