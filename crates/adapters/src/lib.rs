pub mod export;
pub mod ticker;
pub mod websocket;

#[must_use]
pub fn adapter_name() -> &'static str {
    "bpfq-adapters"
}
