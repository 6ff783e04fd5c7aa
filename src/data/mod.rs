//! Data layer: run variables, collections, and tabular export.
//!
//! Architecture:
//! ```text
//!   collection .json            per-run collections
//!        │                             │
//!        ▼                             ▼
//!   ┌──────────┐              ┌───────────────────┐
//!   │  loader   │             │ merge_collections  │
//!   └──────────┘              └───────────────────┘
//!        │                             │
//!        ▼                             ▼
//!   ┌──────────────────────────────────────┐
//!   │ RunVariableCollection                 │  name → Sparse | Dense variable
//!   └──────────────────────────────────────┘
//!        │  match_variables / filter_runs / resample
//!        ▼
//!   ┌──────────┐
//!   │  export   │  to_df → Table (wide or long)
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  writer   │  Table → .csv / .json / .parquet
//!   └──────────┘
//! ```

pub mod collection;
pub mod export;
pub mod filter;
pub mod loader;
pub mod model;
pub mod run_info;
pub mod variable;
pub mod writer;
