use {anyhow::Result, stickerbot_config::StickerbotConfig};

pub fn print_config(config: &StickerbotConfig) -> Result<()> {
    print!("{}", stickerbot_config::to_toml_string(config)?);
    Ok(())
}
