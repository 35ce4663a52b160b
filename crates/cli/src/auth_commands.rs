use {
    anyhow::Result,
    stickerbot_config::{StickerbotConfig, resolve_auth_dir},
    stickerbot_supervisor::{AuthStateStore, FileAuthStore},
};

/// Forget the paired device. Needed after a logout or a rejected session.
pub async fn reset_auth(config: &StickerbotConfig) -> Result<()> {
    let store = FileAuthStore::new(resolve_auth_dir(config));
    let existed = store.creds_path().exists();
    store.clear().await?;
    if existed {
        println!(
            "Removed stored credentials from {}. Start the bot and scan the new QR code.",
            store.dir().display()
        );
    } else {
        println!("No stored credentials in {}.", store.dir().display());
    }
    Ok(())
}
