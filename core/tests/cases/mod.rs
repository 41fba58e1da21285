mod determinism;
mod disconnection;
mod load_balancer;
mod scheduler;
mod server;
