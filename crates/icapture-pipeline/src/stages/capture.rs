use crate::queue::{BoundedQueue, PushOutcome};
use crate::sync::{FrameSynchronizer, SyncedPair};
use icapture_camera::FrameReceiver;
use icapture_shutdown::StopToken;
use icapture_types::Frame;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 采集阶段：两路摄像头帧送入同步器，帧对写入帧队列
pub struct CaptureStage {
    pub wide: Option<FrameReceiver>,
    pub plate: Option<FrameReceiver>,
    pub synchronizer: FrameSynchronizer,
    pub frames: Arc<BoundedQueue<SyncedPair>>,
    pub push_timeout: Duration,
    pub stop: StopToken,
}

/// 运行采集阶段，退出时关闭帧队列
pub async fn run_capture_stage(stage: CaptureStage) {
    let CaptureStage {
        mut wide,
        mut plate,
        mut synchronizer,
        frames,
        push_timeout,
        stop,
    } = stage;

    info!(
        wide = wide.is_some(),
        plate = plate.is_some(),
        "Capture stage started"
    );
    let poll_interval = synchronizer.poll_interval();

    loop {
        while let Some(pair) = synchronizer.try_pair() {
            match frames.push(pair, push_timeout, &stop).await {
                Ok(PushOutcome::Enqueued) => {}
                Ok(PushOutcome::DroppedOldest) => {
                    debug!("Frame queue full, oldest pair dropped");
                }
                Err(_) => {
                    warn!("Frame queue closed, capture stage exiting");
                    return;
                }
            }
        }

        tokio::select! {
            _ = stop.stopped() => break,
            frame = next_from(&mut wide), if wide.is_some() => match frame {
                Some(frame) => synchronizer.insert(frame),
                None => {
                    warn!("Wide camera feed ended");
                    wide = None;
                }
            },
            frame = next_from(&mut plate), if plate.is_some() => match frame {
                Some(frame) => synchronizer.insert(frame),
                None => {
                    warn!("Plate camera feed ended");
                    plate = None;
                }
            },
            // 等待中的参考帧需要按宽限期超时输出
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    frames.close();
    let stats = synchronizer.stats();
    info!(
        pairs = stats.pairs_emitted,
        synchronized = stats.synchronized,
        sync_rate = stats.sync_rate(),
        dropped = frames.dropped(),
        "Capture stage stopped"
    );
}

async fn next_from(feed: &mut Option<FrameReceiver>) -> Option<Frame> {
    match feed {
        Some(rx) => rx.next_frame().await,
        None => std::future::pending().await,
    }
}
