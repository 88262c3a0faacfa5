//! Environment-driven configuration for the processor.

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct ProcessorConfig {
    /// Route parse errors to the idle pipeline so their offset still contributes to
    /// `lastOffset`, pinning the checkpoint forward across runs of malformed messages.
    ///
    /// Defaults to `false`, preserving the source's observed behavior of leaving a
    /// malformed offset unrouted until a later well-formed message lifts the checkpoint
    /// past it.
    #[envconfig(default = "false")]
    pub pin_checkpoint_on_parse_error: bool,

    /// Include the raw payload bytes verbatim in the warn-level log line emitted for a
    /// parse failure, rather than only its offset and length. Off by default since the
    /// dropped bytes may carry sensitive document contents.
    #[envconfig(default = "false")]
    pub log_malformed_payloads: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            pin_checkpoint_on_parse_error: false,
            log_malformed_payloads: false,
        }
    }
}
