//! Instance surface - pages and components bound to host instances.
//!
//! ```ignore
//! let page = Definition::page("index", |props, ctx| {
//!     let count = Ref::new(0);
//!     ctx.on_show(|| tracing::info!("shown"))?;
//!     Ok(Bindings::new().with("count", count))
//! });
//! let instance = Instance::new(page, host);
//! instance.attach()?;
//! // ...
//! instance.detach();
//! ```

mod bindings;
mod context;
mod definition;
mod hooks;
mod host;
mod lifecycle;
mod props;

pub use bindings::Bindings;
pub use context::SetupContext;
pub use definition::{Definition, InstanceKind, SetupFn};
pub use hooks::{Hook, Lifetime};
pub use host::{AckCallback, Host, MemoryHost};
pub use lifecycle::{Instance, LifecycleState};
pub use props::Props;
