use std::path::PathBuf;

/// Configuration for a [`crate::ShardDb`] instance.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory for data, index and manifest files.
    pub dir: PathBuf,

    /// Fsync L0 files before a flush is acknowledged (default: false)
    pub sync_writes: bool,

    /// Target size per memtable; crossing it triggers a switch
    /// (default: 64MB)
    pub max_memtable_size: usize,

    /// Bound on frozen memtables awaiting flush before writes stall
    /// (default: 5)
    pub num_memtables: usize,

    /// Number of column families (default: 3)
    pub num_cfs: usize,

    /// Staging buffer size for the direct-I/O file writer (default: 2MB)
    pub write_buffer_size: usize,

    /// Open L0 files with O_DIRECT. Linux only; ignored elsewhere and on
    /// filesystems without O_DIRECT support such as tmpfs (default: true)
    pub direct_io: bool,

    /// Capacity of the ingest queue; submitters block when full
    /// (default: 256)
    pub ingest_queue_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cinderdb"),
            sync_writes: false,
            max_memtable_size: 64 * 1024 * 1024, // 64MB
            num_memtables: 5,
            num_cfs: 3,
            write_buffer_size: 2 * 1024 * 1024, // 2MB
            direct_io: true,
            ingest_queue_depth: 256,
        }
    }
}

impl Options {
    /// Create options with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Fsync L0 files at flush finish
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Set maximum memtable size
    pub fn max_memtable_size(mut self, size: usize) -> Self {
        self.max_memtable_size = size;
        self
    }

    /// Set the frozen memtable bound
    pub fn num_memtables(mut self, n: usize) -> Self {
        self.num_memtables = n;
        self
    }

    /// Set the column family count
    pub fn num_cfs(mut self, n: usize) -> Self {
        self.num_cfs = n;
        self
    }

    /// Set the direct-I/O write buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Enable or disable O_DIRECT for L0 files
    pub fn direct_io(mut self, enabled: bool) -> Self {
        self.direct_io = enabled;
        self
    }

    /// Set the ingest queue capacity
    pub fn ingest_queue_depth(mut self, depth: usize) -> Self {
        self.ingest_queue_depth = depth;
        self
    }
}
