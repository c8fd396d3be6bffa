// src/lib.rs

pub mod cloudllm;

pub use cloudllm::client_wrapper::{ClientWrapper, Message, Role};
pub use cloudllm::supervisor;

// The modules under `cloudllm` address each other as `crate::<module>` (mirroring how the
// teacher's own submodules reach each other), so re-export the whole set at the crate root
// rather than only the hand-picked items above.
pub use cloudllm::{
    api_client, cancellation, client_wrapper, clients, engine, error, hub_client, orchestrator,
    settings, ticket, tool_protocol, tools, workspace,
};
