use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("runtime error: {message}"))]
    Runtime { message: String },

    #[snafu(display("event at timeline point {point} not reached after {waited_ms}ms (timeline at {reached})"))]
    EventTimeout { point: u64, reached: u64, waited_ms: u128 },

    /// The allocator's memory limit would be exceeded.
    #[snafu(display("out of memory: requested {requested} bytes with {in_use} of {limit} bytes in use"))]
    OutOfMemory { requested: usize, in_use: usize, limit: usize },

    #[snafu(display("failed to allocate {size} bytes on device {device_ordinal}"))]
    AllocationFailed { device_ordinal: usize, size: usize },

    /// Address was not handed out by this allocator or was already freed.
    #[snafu(display("address {address:#x} is not a live allocation of '{allocator}'"))]
    UnknownAllocation { allocator: String, address: usize },

    /// Invalid buffer view parameters.
    #[snafu(display("invalid view: offset {offset} + size {size} exceeds buffer size {buffer_size}"))]
    InvalidView { offset: usize, size: usize, buffer_size: usize },

    #[snafu(display("copy of {size} bytes does not fit: destination {dst_size} bytes, source {src_size} bytes"))]
    CopyOutOfBounds { size: usize, dst_size: usize, src_size: usize },

    #[snafu(display("null device address used for a {size}-byte operation"))]
    NullAddress { size: usize },

    /// Work previously enqueued on the stream failed; the stream is unusable.
    #[snafu(display("stream {stream} failed: {message}"))]
    StreamFailed { stream: usize, message: String },

    #[snafu(display("host callback failed: {message}"))]
    HostCallback { message: String },

    #[snafu(display("module {handle} is not loaded on device {device_ordinal}"))]
    ModuleNotLoaded { handle: u64, device_ordinal: usize },

    #[snafu(display("failed to spawn worker thread '{name}': {source}"))]
    ThreadSpawn { name: String, source: std::io::Error },

    #[snafu(display("{source}"))]
    Shape { source: kiln_shape::Error },
}
