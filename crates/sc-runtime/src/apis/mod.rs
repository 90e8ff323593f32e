//! Sub-APIs surfaced to scripts through [`crate::ChainContext`].
//!
//! Each facade borrows the context and operates through its interior
//! mutability; scripts compose them freely within a tick:
//!
//! ```ignore
//! fn chain(ctx: &ChainContext) -> anyhow::Result<()> {
//!     match ctx.flow().step() {
//!         0 => {
//!             ctx.workers().tcp_send("scanner", json!("TRIGGER"));
//!             ctx.flow().goto(10, "waiting for scan");
//!         }
//!         10 => {
//!             if let Some(dmc) = ctx.workers().tcp_message("scanner") {
//!                 ctx.ui().set_state("current_serialnumber", json!(dmc));
//!                 ctx.flow().goto(0, "");
//!             } else if ctx.timing().timeout(5.0) {
//!                 ctx.flow().fail("scanner did not answer");
//!             }
//!         }
//!         _ => ctx.flow().goto(0, ""),
//!     }
//!     Ok(())
//! }
//! ```

pub mod flow;
pub mod timing;
pub mod ui;
pub mod values;
pub mod vars;
pub mod views;
pub mod workers;

pub use flow::FlowApi;
pub use timing::TimingApi;
pub use ui::{OperatorDisplay, UiApi, ViewCmdFilter};
pub use values::ValuesApi;
pub use vars::VarsApi;
pub use views::{ContainerManagementView, PackagingView, ViewApi, ViewsApi};
pub use workers::{ItacResult, RestRequest, WorkersApi};
