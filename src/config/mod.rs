mod settings;

pub use settings::{Command, Config, HostSettings, ProtocolSettings, RelaySettings, Settings};
