//! # hexo2typecho
//!
//! Migrates a Hexo blog and its Artalk comments to Typecho by generating
//! SQL import files.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ connector_fs │──▶│ frontmatter  │──▶│  normalize  │──▶│   rewrite    │
//! │ _posts scan  │   │ YAML / line  │   │ Post record │   │ math, assets │
//! └──────────────┘   └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                                                │
//!                              ┌─────────────────────────────────┘
//!                              ▼
//!                        ┌──────────┐     posts SQL
//!                        │ post_sql │───▶ + title index (JSON)
//!                        └──────────┘            │
//!                                                ▼
//! ┌──────────┐                            ┌─────────────┐
//! │  artalk  │───────────────────────────▶│ comment_sql │───▶ comments SQL
//! │ (SQLite) │                            └─────────────┘
//! └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Options, defaults and the TOML file |
//! | [`models`] | Core data types |
//! | [`connector_fs`] | Post and asset folder discovery |
//! | [`frontmatter`] | Front matter parsers |
//! | [`normalize`] | Front matter → post fields, slug registry |
//! | [`rewrite`] | Math and asset link rewriting |
//! | [`sql`] | Quoting and statement helpers |
//! | [`post_sql`] | Contents/metas/relationships SQL |
//! | [`title_index`] | Title → cid index shared by both runs |
//! | [`artalk`] | Artalk store reader |
//! | [`comment_sql`] | Comments SQL |
//! | [`convert`] | The two runs, summaries and output files |

pub mod artalk;
pub mod comment_sql;
pub mod config;
pub mod connector_fs;
pub mod convert;
pub mod frontmatter;
pub mod models;
pub mod normalize;
pub mod post_sql;
pub mod rewrite;
pub mod sql;
pub mod title_index;
