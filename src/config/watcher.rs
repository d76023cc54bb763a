//! 配置文件变更监视：轮询两个 YAML 文件的修改时间，变更后重新
//! 加载并通过通道下发完整的新配置快照。
//!
//! 重载失败（YAML 损坏、文件暂不可读）只记录日志，继续沿用旧配置；
//! 只有进程启动时的首次加载失败才是致命错误。

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{error, info, warn};

use crate::config::system::SystemConfig;
use crate::config::user::UsersConfig;

/// 一次完整的配置重载结果，整体下发，任务不会读到半更新状态。
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    pub system: SystemConfig,
    pub users: UsersConfig,
}

pub struct ConfigWatcher {
    system_path: PathBuf,
    users_path: PathBuf,
    poll_interval: Duration,
}

impl ConfigWatcher {
    pub fn new<P: Into<PathBuf>>(system_path: P, users_path: P, poll_interval: Duration) -> Self {
        Self {
            system_path: system_path.into(),
            users_path: users_path.into(),
            poll_interval,
        }
    }

    /// 监视循环：mtime 变化时重载两个文档并原子下发。
    pub async fn run(self, tx: mpsc::Sender<ConfigUpdate>) {
        let mut last_seen = (mtime(&self.system_path), mtime(&self.users_path));
        info!(
            "配置监视已启动: {} / {}（每 {:?} 轮询）",
            self.system_path.display(),
            self.users_path.display(),
            self.poll_interval
        );

        loop {
            time::sleep(self.poll_interval).await;

            let current = (mtime(&self.system_path), mtime(&self.users_path));
            if current == last_seen {
                continue;
            }
            last_seen = current;

            let system = match SystemConfig::load_from_file(&self.system_path) {
                Ok(system) => system,
                Err(err) => {
                    error!("系统配置重载失败，沿用旧配置: {}", err);
                    continue;
                }
            };
            let users = match UsersConfig::load_from_file(&self.users_path) {
                Ok(users) => users,
                Err(err) => {
                    error!("用户配置重载失败，沿用旧配置: {}", err);
                    continue;
                }
            };

            info!("检测到配置变更，下发新配置（{} 个用户）", users.user_count());
            if tx.send(ConfigUpdate { system, users }).await.is_err() {
                warn!("配置接收端已关闭，配置监视退出");
                return;
            }
        }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
