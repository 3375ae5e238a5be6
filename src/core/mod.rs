pub mod config;
pub mod jobs;
pub mod lifecycle;
pub mod llm;
pub mod store;
pub mod terminal;

#[cfg(test)]
pub mod testing;
