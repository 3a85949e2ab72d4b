use log::*;

use engine::{Engine, VulkanContext};

mod game;
mod highscore;
mod state;

use game::BoatRunner;
use highscore::{HighScore, HIGHSCORE_FILE};

fn main() {
    pretty_env_logger::init();

    let game: BoatRunner<VulkanContext> = BoatRunner::new(HighScore::load(HIGHSCORE_FILE));
    if let Err(err) = Engine::new(game).run() {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
