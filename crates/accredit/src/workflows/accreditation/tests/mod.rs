mod common;
mod concurrency;
mod evaluation;
