pub mod compile;
pub mod dedup;
pub mod error;
pub mod exporter;
pub mod host;
pub mod ops;
pub mod plugin;
pub mod process;
pub mod session;

pub use compile::{CodeBlock, CompileRequest, CompileResult, Warning, WarningKind, compile};
pub use error::SessionError;
pub use host::{AssetDescriptor, AssetStore, FaviconSource, SceneHost};
pub use ops::{CodeRequest, Screenshot, TokenDef, resolve_selection};
pub use plugin::{HookKind, Isolate, IsolateFactory, PluginChannel};
pub use process::{ProcessIsolate, ProcessIsolateFactory};
pub use session::Session;
