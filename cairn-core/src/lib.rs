//! # cairn-core
//!
//! Action dispatch and state synchronization for a layered volume editor.
//! Every change to the project goes through one queue, runs on one owner
//! thread, and is recorded for undo and provenance.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cairn_core::action::{ActionContext, ActionFactory};
//! use cairn_core::config::Config;
//! use cairn_core::dispatch::Dispatcher;
//! use cairn_core::project::Project;
//! use cairn_types::ActionSource;
//!
//! // 1. Build the project and hand it to the owner thread
//! let config = Config::load();
//! let dispatcher = Dispatcher::start(Project::new(&config), &config)?;
//!
//! // 2. Turn a command string into an action and run it
//! let factory = ActionFactory::with_builtins();
//! let action = factory.create("new_layer(name=CT, dims=[64,64,32])")?;
//! let context = ActionContext::new(ActionSource::CommandLine);
//! dispatcher.post_and_wait(action, &context)?;
//! assert!(context.is_success());
//!
//! // 3. Read the project back on the owner thread
//! let names = dispatcher.query(|p| p.layers().iter().map(|(_, l)| l.name()).collect::<Vec<_>>())?;
//! ```
//!
//! ## Module Overview
//!
//! - [`state`]: typed observable cells, the registry that names them, and
//!   the re-entrant lock serialising all writes
//! - [`layer`]: layer arena and volumes; each layer exposes its attributes
//!   as state cells
//! - [`action`]: the `Action` trait, contexts, the command parser and
//!   factory, and the built-in actions
//! - [`dispatch`]: the queue and owner thread
//! - [`undo`]: checkpoint-based undo and redo
//! - [`provenance`]: the provenance log, trails and replay
//! - [`persistence`]: SQLite project files
//! - [`action_log`]: JSONL record of executed actions
//! - [`config`]: embedded defaults plus user overrides

pub mod action;
pub mod action_log;
pub mod config;
pub mod dispatch;
pub mod layer;
pub mod persistence;
pub mod project;
pub mod provenance;
pub mod signal;
pub mod state;
pub mod undo;

pub use cairn_types as types;
