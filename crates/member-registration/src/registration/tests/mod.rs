mod common;
mod persistence;
mod wizard;
