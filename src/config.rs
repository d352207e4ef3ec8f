/// Knobs of the libc backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Create descriptors with `SOCK_CLOEXEC` so they do not leak into
    /// spawned processes.
    pub close_on_exec: bool,
    /// Suppress `SIGPIPE` on sends to a closed peer; the send fails with
    /// `EPIPE` instead.
    pub no_sigpipe: bool,
    /// Bytes moved per `sendfile` call. Zero is treated as one.
    pub sendfile_chunk: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            close_on_exec: true,
            no_sigpipe: true,
            sendfile_chunk: 64 * 1024,
        }
    }
}

impl Options {
    pub fn close_on_exec(mut self, on: bool) -> Self {
        self.close_on_exec = on;
        self
    }

    pub fn no_sigpipe(mut self, on: bool) -> Self {
        self.no_sigpipe = on;
        self
    }

    pub fn sendfile_chunk(mut self, bytes: usize) -> Self {
        self.sendfile_chunk = bytes.max(1);
        self
    }
}
