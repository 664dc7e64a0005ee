use backup_core::{
    api::CentralServer,
    config::AppConfig,
    error::Result,
    ops::{CommandExporter, CommandInventory, RetentionRemover, ZipArchiver},
    orchestrator::{Collaborators, Orchestrator},
    reporter::ProgressReporter,
    schedule::{FireBatch, Scheduler},
    sync::{ActiveTask, LocalTaskStore, TaskSync},
    task::BackupTask,
    template::HostNames,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::{Commands, ScheduleCommand, TaskCommand};
use crate::commands;

/// 代理应用：持有配置，并按配置组装各个组件
pub struct AgentApp {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub host: HostNames,
    pub central: Option<Arc<CentralServer>>,
}

impl AgentApp {
    /// 加载配置并初始化应用，配置文件不存在时写入默认配置
    pub fn load(config_path: &Path) -> Result<Self> {
        let config = AppConfig::find_and_load_config(Some(config_path))?;
        Self::new(config, config_path.to_path_buf())
    }

    pub fn new(config: AppConfig, config_path: PathBuf) -> Result<Self> {
        let host = HostNames::resolve(&config.host.full_name, &config.host.short_name);

        let central = match config.central_server_url() {
            Some(url) => {
                let server = CentralServer::new(url, config.central_server.timeout_secs)?;
                info!(url = %server.base_url(), "使用中央服务器");
                Some(Arc::new(server))
            }
            None => {
                warn!("未配置中央服务器，以独立模式运行");
                None
            }
        };

        Ok(Self {
            config,
            config_path,
            host,
            central,
        })
    }

    /// 本机在中央服务器上的名称
    pub fn hypervisor(&self) -> &str {
        &self.host.full
    }

    pub fn task_store(&self) -> LocalTaskStore {
        LocalTaskStore::new(self.config.task_file())
    }

    /// 读取本地任务文件
    pub fn load_local_task(&self) -> Result<Option<BackupTask>> {
        self.task_store().load()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            exporter: Arc::new(CommandExporter::new(
                self.config.export.program.clone(),
                self.config.export.args.clone(),
                self.host.clone(),
            )),
            archiver: Arc::new(ZipArchiver::new()),
            remover: Arc::new(RetentionRemover::new()),
        }
    }

    pub fn task_sync(
        &self,
        active: Arc<ActiveTask>,
    ) -> (TaskSync, mpsc::UnboundedReceiver<Arc<BackupTask>>) {
        let inventory = Arc::new(CommandInventory::new(
            self.config.inventory.program.clone(),
            self.config.inventory.args.clone(),
        ));

        let (sync, changes) = TaskSync::new(
            self.hypervisor(),
            self.config.service.default_parallel_backups,
            self.task_store(),
            active,
        );
        let mut sync = sync.with_inventory(inventory);
        if let Some(central) = &self.central {
            sync = sync
                .with_remote(central.clone())
                .with_registrar(central.clone());
        }
        (sync, changes)
    }

    pub fn orchestrator(&self) -> (Arc<Orchestrator>, mpsc::UnboundedReceiver<FireBatch>) {
        let (scheduler, fires) = Scheduler::new();
        let orchestrator = Orchestrator::new(
            self.host.clone(),
            self.config.service.default_parallel_backups,
            self.collaborators(),
            scheduler,
        );
        (orchestrator, fires)
    }

    pub fn reporter(&self, active: Arc<ActiveTask>) -> ProgressReporter {
        let reporter = ProgressReporter::new(self.hypervisor(), active);
        match &self.central {
            Some(central) => reporter.with_sink(central.clone()),
            None => reporter,
        }
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Run => commands::run_service(self).await,
            Commands::Init { force } => commands::run_init(&self.config_path, force),
            Commands::Task(TaskCommand::Show) => commands::show_task(self),
            Commands::Task(TaskCommand::Validate { file }) => {
                commands::validate_task(self, file.as_deref())
            }
            Commands::Task(TaskCommand::Refresh) => commands::refresh_task(self).await,
            Commands::Schedule(ScheduleCommand::Preview { count }) => {
                commands::preview_schedules(self, count)
            }
            Commands::Backup { machine } => commands::backup_machine(self, &machine).await,
        }
    }
}
