//! Flutter bridge over the plugin host core.

pub mod api;
