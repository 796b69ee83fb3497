mod accumulator;
mod backend;
mod cli;
mod config;
mod contact;
mod error;
mod geometry;
mod input;
mod ipc;
mod logging;
mod recognition;
mod region;
mod replay;
mod scheduler;
mod stroke;
mod surface;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
