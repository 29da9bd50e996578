// wollok-embed - Embedding API for the Wollok programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # wollok-embed
//!
//! High-level embedding API for the Wollok core: link user packages onto
//! the built-in base library, keep a ready evaluation, send messages, run
//! programs and tests, and convert values between Rust and Wollok.
//!
//! # Quick start
//!
//! ```
//! use wollok_embed::{Engine, FromWollok};
//! use wollok_model::ast::{Body, Entity, Expression, Member, Method, Package, Singleton};
//!
//! let counter = Singleton::named(
//!     "answer",
//!     vec![Member::Method(Method::new(
//!         "value",
//!         vec![],
//!         Body::of(Expression::number(42.0)),
//!     ))],
//! );
//! let mut engine = Engine::new(vec![Package::new(
//!     "demo",
//!     vec![Entity::Singleton(counter)],
//! )])
//! .unwrap();
//!
//! let result = engine.send_to("demo.answer", "value", &[]).unwrap();
//! let value = f64::from_wollok(engine.evaluation(), result).unwrap();
//! assert_eq!(value, 42.0);
//! ```

pub mod convert;
pub mod engine;
pub mod natives;

pub use convert::{ConvertError, FromWollok, IntoWollok};
pub use engine::{Engine, EngineError, Result, TestResult};
pub use natives::default_natives;
