mod auth;
mod common;
mod conversations;
mod step_flow;
