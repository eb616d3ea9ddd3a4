// Voice profiles: writing-style fingerprints and the Similarity Engine.
// All embedding calls go through `embedding::Embedder`; the shared model is
// injected via `AppState`, never looked up ambiently.

pub mod embedding;
pub mod handlers;
pub mod models;
pub mod service;
pub mod similarity;
pub mod store;
