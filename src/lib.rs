//! dapline — a Debug Adapter Protocol session engine with a stdio null
//! adapter for exercising clients.

pub mod adapter;
