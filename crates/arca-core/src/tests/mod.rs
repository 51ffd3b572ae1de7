mod check;
mod chunker;
mod keys;
mod prune;
