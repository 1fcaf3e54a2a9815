pub mod config;
pub mod engine;
pub mod events;
pub mod live_view;
pub mod presets;
pub mod render_scheduler;
pub mod row_buffer;
pub mod schema_tracker;
pub mod status;
pub mod submission;
pub mod transport;

#[must_use]
pub fn domain_name() -> &'static str {
    "bpfq-core"
}
