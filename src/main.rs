use anyhow::Result;
use story2storyboard::config::Config;
use story2storyboard::gateway;
use story2storyboard::session::GenerationSession;
use story2storyboard::wizard::Wizard;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid AI settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let gateway = gateway::create_gateway(&config)?;
    let session = GenerationSession::new(gateway, config.max_characters);

    let mut wizard = Wizard::new(session, &config);
    wizard.run().await
}
