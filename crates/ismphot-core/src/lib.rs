pub mod astromref;
pub mod cache;
pub mod combined;
pub mod config;
pub mod consts;
pub mod context;
pub mod discover;
pub mod error;
pub mod frame;
pub mod identity;
pub mod ingest;
pub mod io;
pub mod matching;
pub mod newsource;
pub mod photref;
pub mod pool;
pub mod progress;
pub mod quality;
pub mod reference;
pub mod registry;
pub mod stack;
pub mod subtract;
pub mod tools;
pub mod warp;
pub mod xysdk;
