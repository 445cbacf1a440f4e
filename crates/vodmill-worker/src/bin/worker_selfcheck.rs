use std::path::Path;

use vodmill_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir
    );
    ensure_dir(&config.work_dir).await?;
    ensure_dir(&config.output_dir).await?;
    ensure_tools()?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_tools() -> anyhow::Result<()> {
    let ffmpeg = vodmill_media::check_ffmpeg()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    let ffprobe = vodmill_media::check_ffprobe()
        .map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;

    println!(
        "worker-selfcheck: ffmpeg={} ffprobe={}",
        ffmpeg.display(),
        ffprobe.display()
    );
    Ok(())
}
