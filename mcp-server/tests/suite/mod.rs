mod batch;
mod initialize;
mod lifecycle;
mod tools;
