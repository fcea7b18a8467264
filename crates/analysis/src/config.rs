/// Runtime and compiler helper symbols emitted by the Go wasm toolchain.
pub const GO_RUNTIME_PREFIXES: &[&str] = &[
    "runtime.",
    "runtime_",
    "callRet",
    "memeqbody",
    "cmpbody",
    "memcmp",
    "memchr",
    "time.now",
    "sync.event",
    "internal_bytealg",
    "internal_cpu",
];

/// Shadow stack layout the stub estimator matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubShape {
    /// Global holding the shadow stack pointer.
    pub sp_global: u32,
    /// Bytes reserved per frame.
    pub frame_size: i32,
}

impl Default for StubShape {
    fn default() -> Self {
        Self {
            sp_global: 0,
            frame_size: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub prefixes: Vec<String>,
    pub parallel: bool,
    pub estimate_stubs: bool,
    pub stub_shape: StubShape,
}

impl SplitConfig {
    pub fn go_runtime() -> Self {
        Self::default().with_prefixes(GO_RUNTIME_PREFIXES.iter().copied())
    }

    pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    pub fn matches(&self, name: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            parallel: true,
            estimate_stubs: true,
            stub_shape: StubShape::default(),
        }
    }
}
