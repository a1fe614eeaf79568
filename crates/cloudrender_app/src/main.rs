mod app;
mod commands;
mod config;
mod logging;
mod timers;
mod view;

fn main() -> anyhow::Result<()> {
    app::run()
}
