//! # fayl: named SQL queries from files
//!
//! Every `.sql` file under a query root is a template addressed by a dotted
//! code. A call names the code, binds parameters, optionally asks for ordering
//! and pagination, and picks where the rows go.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use fayl::prelude::*;
//!
//! // queries/users/get_by_id.sql:
//! //   SELECT id, name FROM users WHERE id = {{ .id }}
//! let fayl = Fayl::init(Options::new(pool, "queries")).await?;
//! let ctx = Context::new();
//!
//! let mut user = User::default();
//! fayl.run("users.get_by_id")
//!     .with_param("id", 7)
//!     .scan_struct(&mut user)
//!     .query(&ctx)
//!     .await?;
//!
//! let mut page = Vec::<User>::new();
//! let result = fayl
//!     .run("users.list")
//!     .with_order_by(["-created_at", "id"])
//!     .with_pagination(Pagination::cursor("", 20))
//!     .scan_structs(&mut page)
//!     .query(&ctx)
//!     .await?;
//! let next = result.pagination.and_then(|p| p.next().map(String::from));
//! ```
//!
//! ## Template Syntax
//!
//! | Construct                          | Meaning                                 |
//! |------------------------------------|-----------------------------------------|
//! | `{{ .name }}`                      | Bind a parameter (lists expand)         |
//! | `{{ if .x }} … {{ else }} … {{ end }}` | Conditional SQL                     |
//! | `eq ne lt le gt ge and or not len` | Functions in conditions                 |
//! | `{{/* … */}}`                      | Comment                                 |

pub mod client;
pub mod config;
pub mod context;
pub mod dialect;
pub mod error;
pub mod pagination;
pub mod registry;
pub mod runner;
pub mod scanner;
pub mod template;
pub mod value;

pub use client::{Fayl, Options, Tx};
pub use config::Config;
pub use context::Context;
pub use dialect::Placeholder;
pub use error::{FaylError, FaylResult};
pub use pagination::{Pagination, PaginationResponse};
pub use registry::Registry;
pub use runner::{ExecResult, QueryResult, Runner};
pub use scanner::Record;
pub use value::{Params, Value};

pub mod prelude {
    pub use crate::client::{Fayl, Options, Tx};
    pub use crate::context::Context;
    pub use crate::dialect::Placeholder;
    pub use crate::error::*;
    pub use crate::pagination::{Pagination, PaginationResponse};
    pub use crate::runner::{ExecResult, QueryResult, Runner};
    pub use crate::scanner::Record;
    pub use crate::value::{Params, Value};
}
