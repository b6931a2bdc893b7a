mod helpers;
mod pipeline;
mod publishers;
