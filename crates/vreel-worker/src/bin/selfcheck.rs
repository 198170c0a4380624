use std::path::Path;
use std::process::Command;

use vreel_models::{checkpoint_schema, Stage};
use vreel_storage::CheckpointStore;
use vreel_worker::{validate_checkpoint, PipelineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = PipelineConfig::from_env().map_err(|e| anyhow::anyhow!("{}", e))?;

    println!(
        "vreel-selfcheck: starting with output_dir={} checkpoint_dir={}",
        config.output_dir.display(),
        config.checkpoint_dir.display()
    );
    ensure_workdir(&config.output_dir).await?;
    ensure_workdir(&config.checkpoint_dir).await?;
    ensure_tool("ffmpeg")?;
    ensure_tool("ffprobe")?;
    check_checkpoints(&config.checkpoint_dir).await?;
    write_schema(&config.checkpoint_dir).await?;

    println!("vreel-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_tool(name: &str) -> anyhow::Result<()> {
    let path = which::which(name).map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;
    let output = Command::new(&path)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not runnable: {}", name, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("{} -version failed: {:?}", name, output.status));
    }
    println!("vreel-selfcheck: found {} at {}", name, path.display());
    Ok(())
}

/// Validate every checkpoint already present.
async fn check_checkpoints(dir: &Path) -> anyhow::Result<()> {
    let store = CheckpointStore::new(dir);
    for stage in Stage::ALL {
        let path = store.path_for(stage);
        if !store.exists(stage).await {
            continue;
        }
        let checkpoint = validate_checkpoint(&path)
            .await
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
        println!(
            "vreel-selfcheck: {} valid ({} segments)",
            path.display(),
            checkpoint.segments().len()
        );
    }
    Ok(())
}

/// Schema for people editing checkpoints by hand.
async fn write_schema(dir: &Path) -> anyhow::Result<()> {
    let path = dir.join("checkpoint.schema.json");
    let schema = serde_json::to_vec_pretty(&checkpoint_schema())?;
    vreel_storage::write_atomic(&path, &schema).await?;
    println!("vreel-selfcheck: wrote {}", path.display());
    Ok(())
}
