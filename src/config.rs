/// Zone creation policy. Requests up to [`Config::tiny_limit`] bytes are
/// tiny, up to [`Config::small_limit`] bytes are small and anything bigger is
/// large. When no existing block can serve a tiny or small request, the new
/// zone reserves a fixed number of pages so that lots of future requests of
/// the same kind fit without talking to the kernel again. Large requests get
/// a zone of exactly the pages they need.
///
/// # Examples
///
/// ```rust
/// use zonalloc::{Config, ZoneAllocator};
///
/// // Bigger tiny zones, everything else as usual.
/// static ALLOCATOR: ZoneAllocator = ZoneAllocator::with_config(Config {
///     tiny_zone_pages: 16,
///     ..Config::DEFAULT
/// });
///
/// let address = ALLOCATOR.allocate(32).unwrap();
/// unsafe { ALLOCATOR.release(address.as_ptr()) };
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Largest request size (in bytes) considered tiny.
    pub tiny_limit: usize,
    /// Largest request size (in bytes) considered small.
    pub small_limit: usize,
    /// Pages reserved by a zone created for a tiny request.
    pub tiny_zone_pages: usize,
    /// Pages reserved by a zone created for a small request.
    pub small_zone_pages: usize,
}

impl Config {
    /// 128 byte tiny limit and 1024 byte small limit. With 4096 byte pages,
    /// one tiny zone fits about a hundred of the largest tiny requests and one
    /// small zone about a hundred of the largest small requests.
    pub const DEFAULT: Config = Config {
        tiny_limit: 128,
        small_limit: 1024,
        tiny_zone_pages: 4,
        small_zone_pages: 32,
    };
}

impl Default for Config {
    fn default() -> Self {
        Config::DEFAULT
    }
}
