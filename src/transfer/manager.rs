use super::{
    FileUpload, Notification, StreamEvent, UploadCommand, UploadCtrl, UploadLimits,
    UploadManagerError, UploadSnapshot, UploadTask,
};
use crate::config::ConfigManager;
use crate::transport::{
    FinalizeRequest, ProgressEvent, TransportError, UploadRequest, UploadStatus, UploadTransport,
};
use crate::utils::format_size;
use futures::StreamExt;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, info, warn};

/// 终态任务在可见列表里保留的时间
const HIDE_DELAY: Duration = Duration::from_secs(5);

/// 上传控制器的句柄，drop 时控制循环一并退出
pub struct UploadManager {
    ctrl: mpsc::Sender<UploadCtrl>,
    snapshot: watch::Receiver<UploadSnapshot>,
    changes: watch::Receiver<u64>,
    abort: AbortHandle,
}

impl UploadManager {
    pub fn run<T: UploadTransport>(
        dataset: impl Into<String>,
        transport: T,
        limits: UploadLimits,
        notify: mpsc::Sender<Notification>,
    ) -> Self {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(256);
        let (snapshot_tx, snapshot) = watch::channel(UploadSnapshot::default());
        let (change_tx, changes) = watch::channel(0);
        let controller = Controller {
            dataset: dataset.into(),
            transport: Arc::new(transport),
            limits,
            tasks: Vec::new(),
            streams: HashMap::new(),
            pending: VecDeque::new(),
            active_uploads: 0,
            upload_times: HashMap::new(),
            hide_keys: HashMap::new(),
            ctrl_tx: ctrl_tx.clone(),
            snapshot_tx,
            change_tx,
            notify_tx: notify,
        };
        let abort = tokio::spawn(controller.run(ctrl_rx)).abort_handle();
        Self {
            ctrl: ctrl_tx,
            snapshot,
            changes,
            abort,
        }
    }

    /// 并发与尺寸限制取自设置存储
    pub async fn with_settings<T: UploadTransport>(
        dataset: impl Into<String>,
        transport: T,
        settings: &ConfigManager,
        notify: mpsc::Sender<Notification>,
    ) -> Self {
        let limits = UploadLimits::load(settings).await;
        Self::run(dataset, transport, limits, notify)
    }

    /// 提交一批文件，每个文件独立决定立即上传还是排队
    pub async fn submit(&self, files: Vec<FileUpload>) -> Result<(), UploadManagerError> {
        self.ctrl
            .send(UploadCtrl::Command(UploadCommand::Submit(files)))
            .await
            .map_err(|_| UploadManagerError::Closed)
    }

    /// 用户显式中止：立即移除任务并请求后端丢弃分块
    pub async fn abort_upload(
        &self,
        file_path: impl Into<String>,
    ) -> Result<(), UploadManagerError> {
        self.ctrl
            .send(UploadCtrl::Command(UploadCommand::Abort {
                file_path: file_path.into(),
            }))
            .await
            .map_err(|_| UploadManagerError::Closed)
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<UploadSnapshot> {
        self.snapshot.clone()
    }

    /// 每次有上传落盘，计数加一
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }
}

impl Drop for UploadManager {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

struct Controller<T> {
    dataset: String,
    transport: Arc<T>,
    limits: UploadLimits,
    /// 可见任务列表，新任务插到最前
    tasks: Vec<UploadTask>,
    /// 订阅表：表里有这个键就等于这个任务占着一个槽位
    streams: HashMap<String, AbortHandle>,
    pending: VecDeque<FileUpload>,
    active_uploads: usize,
    upload_times: HashMap<String, Duration>,
    hide_keys: HashMap<String, delay_queue::Key>,
    ctrl_tx: mpsc::Sender<UploadCtrl>,
    snapshot_tx: watch::Sender<UploadSnapshot>,
    change_tx: watch::Sender<u64>,
    notify_tx: mpsc::Sender<Notification>,
}

impl<T: UploadTransport> Controller<T> {
    async fn run(mut self, mut ctrl_rx: mpsc::Receiver<UploadCtrl>) {
        let mut hides = DelayQueue::<String>::new();
        loop {
            tokio::select! {
                msg = ctrl_rx.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        UploadCtrl::Command(cmd) => self.on_command(cmd, &mut hides),
                        UploadCtrl::Stream(event) => self.on_stream(event, &mut hides),
                    }
                    self.publish();
                }
                Some(expired) = hides.next() => {
                    self.on_hide_expired(expired.into_inner());
                    self.publish();
                }
            }
        }
    }

    fn on_command(&mut self, cmd: UploadCommand, hides: &mut DelayQueue<String>) {
        match cmd {
            UploadCommand::Submit(files) => {
                for file in files {
                    self.submit_one(file, hides);
                }
            }
            UploadCommand::Abort { file_path } => self.abort_upload(file_path, hides),
        }
    }

    fn on_stream(&mut self, event: StreamEvent, hides: &mut DelayQueue<String>) {
        match event {
            StreamEvent::Progress { file_path, event } => self.on_progress(file_path, event, hides),
            StreamEvent::Error { file_path, error } => {
                self.on_stream_error(file_path, error, hides)
            }
            StreamEvent::Complete { file_path } => self.on_stream_complete(file_path, hides),
        }
    }

    fn submit_one(&mut self, file: FileUpload, hides: &mut DelayQueue<String>) {
        let cap = self.limits.max_file_bytes();
        if file.content.len() > cap {
            // 超限的提交整个跳过，不能连带取消同名的在途上传
            warn!(file = %file.name, size = file.content.len(), "submission over the size cap");
            self.notify(Notification::Error(format!(
                "{} ({}) exceeds the maximum upload size of {}",
                file.name,
                format_size(file.content.len() as u64),
                format_size(cap as u64),
            )));
            return;
        }
        // 同名任务以后提交的为准
        self.cancel_existing(&file.name, hides);
        if self.active_uploads < self.limits.max_concurrent_files {
            self.active_uploads += 1;
            self.start(file);
        } else {
            self.pending.push_back(file);
        }
    }

    /// 把某个文件名相关的任务、订阅、排队项、隐藏计时全部清掉
    fn cancel_existing(&mut self, name: &str, hides: &mut DelayQueue<String>) {
        self.pending.retain(|queued| queued.name != name);
        self.tasks.retain(|task| task.file_path != name);
        if let Some(key) = self.hide_keys.remove(name) {
            hides.remove(&key);
        }
        // 只有还挂着订阅的任务占着槽位，排队项从来不占
        if let Some(abort) = self.streams.remove(name) {
            abort.abort();
            self.release_slot();
        }
    }

    fn start(&mut self, file: FileUpload) {
        self.pending.retain(|queued| queued.name != file.name);
        let file_path = file.name;
        self.tasks.insert(0, UploadTask::initializing(file_path.clone()));
        let events = self.transport.start_upload(UploadRequest {
            dataset: self.dataset.clone(),
            file_path: file_path.clone(),
            content: file.content,
            chunk_size: self.limits.chunk_size_bytes(),
            max_concurrent_chunks: self.limits.max_concurrent_chunks,
        });
        let abort = forward_progress(file_path.clone(), events, self.ctrl_tx.clone());
        debug!(file = %file_path, "upload started");
        self.streams.insert(file_path, abort);
    }

    fn on_progress(
        &mut self,
        file_path: String,
        event: ProgressEvent,
        hides: &mut DelayQueue<String>,
    ) {
        let finished = event.status == UploadStatus::Finished && event.total_time.is_some();
        let total_time = event.total_time;
        let Some(task) = self.tasks.iter_mut().find(|t| t.file_path == file_path) else {
            // 任务已被取消，迟到的进度直接丢弃
            return;
        };
        task.merge(event);
        if !finished {
            return;
        }
        let basename = file_path
            .rsplit('/')
            .next()
            .unwrap_or(file_path.as_str())
            .to_string();
        if let Some(total) = total_time {
            self.upload_times.insert(basename, total);
        }
        info!(file = %file_path, "upload finished");
        self.notify_changes();
        self.schedule_hide(file_path.clone(), hides);
        // 不去 abort 订阅，让流自己走完；把表项拿掉之后迟到的关闭不会再归还槽位
        if self.streams.remove(&file_path).is_some() {
            self.release_slot();
        }
    }

    fn on_stream_error(
        &mut self,
        file_path: String,
        error: TransportError,
        hides: &mut DelayQueue<String>,
    ) {
        warn!(file = %file_path, %error, "upload stream failed");
        let known = match self.tasks.iter_mut().find(|t| t.file_path == file_path) {
            Some(task) => {
                task.percentage = 100.0;
                task.status = UploadStatus::Aborted;
                true
            }
            None => false,
        };
        if known {
            self.schedule_hide(file_path.clone(), hides);
        }
        if self.streams.remove(&file_path).is_some() {
            self.release_slot();
        }
    }

    /// 流关闭但没给终态负载，补记成 finished
    fn on_stream_complete(&mut self, file_path: String, hides: &mut DelayQueue<String>) {
        if self.streams.remove(&file_path).is_none() {
            // 已经结算过了，这是迟到的流关闭
            return;
        }
        if let Some(task) = self.tasks.iter_mut().find(|t| t.file_path == file_path) {
            task.status = UploadStatus::Finished;
        }
        self.notify_changes();
        self.schedule_hide(file_path.clone(), hides);
        self.release_slot();
    }

    fn abort_upload(&mut self, file_path: String, hides: &mut DelayQueue<String>) {
        let Some(pos) = self.tasks.iter().position(|t| t.file_path == file_path) else {
            return;
        };
        // 显式中止不留 5 秒的展示期
        let task = self.tasks.remove(pos);
        if let Some(key) = self.hide_keys.remove(&file_path) {
            hides.remove(&key);
        }
        if let Some(abort) = self.streams.remove(&file_path) {
            abort.abort();
            self.release_slot();
        }
        info!(file = %file_path, "upload aborted by user");
        // 让后端把已收到的分块清掉，结果走通知
        let transport = self.transport.clone();
        let notify = self.notify_tx.clone();
        let req = FinalizeRequest {
            dataset: self.dataset.clone(),
            file_path: file_path.clone(),
            upload_id: task.upload_id,
            parts: Vec::new(),
            physical_address: task.physical_address,
            abort: true,
        };
        tokio::spawn(async move {
            match transport.finalize(req).await {
                Ok(()) => {
                    let _ = notify.try_send(Notification::Info(format!(
                        "{file_path} uploading has been terminated"
                    )));
                }
                Err(err) => {
                    let _ = notify.try_send(Notification::Error(format!(
                        "failed to abort the upload of {file_path}: {err}"
                    )));
                }
            }
        });
    }

    /// 唯一的晋升路径：归还一个槽位，队头有等待的就立刻顶上
    fn release_slot(&mut self) {
        self.active_uploads = self.active_uploads.saturating_sub(1);
        if self.active_uploads < self.limits.max_concurrent_files {
            if let Some(next) = self.pending.pop_front() {
                self.active_uploads += 1;
                self.start(next);
            }
        }
    }

    fn schedule_hide(&mut self, file_path: String, hides: &mut DelayQueue<String>) {
        // 同名任务只保留最新的隐藏计时，旧计时不能误删新任务
        if let Some(old) = self.hide_keys.remove(&file_path) {
            hides.remove(&old);
        }
        let key = hides.insert(file_path.clone(), HIDE_DELAY);
        self.hide_keys.insert(file_path, key);
    }

    fn on_hide_expired(&mut self, file_path: String) {
        self.hide_keys.remove(&file_path);
        self.tasks.retain(|task| task.file_path != file_path);
    }

    fn publish(&self) {
        debug_assert_eq!(self.active_uploads, self.streams.len());
        self.snapshot_tx.send_replace(UploadSnapshot {
            tasks: self.tasks.clone(),
            active_uploads: self.active_uploads,
            queued_files: self.pending.iter().map(|f| f.name.clone()).collect(),
            upload_times: self.upload_times.clone(),
        });
    }

    fn notify_changes(&self) {
        self.change_tx.send_modify(|n| *n += 1);
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notify_tx.try_send(notification);
    }
}

/// 把一条进度流转发进控制循环；句柄被 abort 就等于退订
fn forward_progress(
    file_path: String,
    events: mpsc::Receiver<Result<ProgressEvent, TransportError>>,
    ctrl: mpsc::Sender<UploadCtrl>,
) -> AbortHandle {
    tokio::spawn(async move {
        let mut events = ReceiverStream::new(events);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    let forwarded = ctrl
                        .send(UploadCtrl::Stream(StreamEvent::Progress {
                            file_path: file_path.clone(),
                            event,
                        }))
                        .await;
                    if forwarded.is_err() {
                        return;
                    }
                }
                Err(error) => {
                    let _ = ctrl
                        .send(UploadCtrl::Stream(StreamEvent::Error { file_path, error }))
                        .await;
                    return;
                }
            }
        }
        let _ = ctrl
            .send(UploadCtrl::Stream(StreamEvent::Complete { file_path }))
            .await;
    })
    .abort_handle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    const A: &str = "data/a.bin";
    const B: &str = "data/b.bin";
    const C: &str = "data/c.bin";
    const D: &str = "data/d.bin";

    #[derive(Default)]
    struct MockTransport {
        started: Mutex<Vec<StartedUpload>>,
        finalized: Mutex<Vec<FinalizeRequest>>,
        fail_finalize: AtomicBool,
    }

    struct StartedUpload {
        req: UploadRequest,
        progress: Option<mpsc::Sender<Result<ProgressEvent, TransportError>>>,
    }

    impl MockTransport {
        fn started_paths(&self) -> Vec<String> {
            self.started
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.req.file_path.clone())
                .collect()
        }

        fn progress_sender(&self, path: &str) -> mpsc::Sender<Result<ProgressEvent, TransportError>> {
            self.started
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|s| s.req.file_path == path)
                .and_then(|s| s.progress.clone())
                .unwrap()
        }

        // 丢掉持有的发送端，模拟流正常关闭
        fn close_stream(&self, path: &str) {
            self.started
                .lock()
                .unwrap()
                .iter_mut()
                .rev()
                .find(|s| s.req.file_path == path)
                .unwrap()
                .progress = None;
        }

        fn finalized(&self) -> Vec<FinalizeRequest> {
            self.finalized.lock().unwrap().clone()
        }
    }

    impl UploadTransport for Arc<MockTransport> {
        fn start_upload(
            &self,
            req: UploadRequest,
        ) -> mpsc::Receiver<Result<ProgressEvent, TransportError>> {
            let (tx, rx) = mpsc::channel(32);
            self.started.lock().unwrap().push(StartedUpload {
                req,
                progress: Some(tx),
            });
            rx
        }

        fn finalize(
            &self,
            req: FinalizeRequest,
        ) -> impl Future<Output = Result<(), TransportError>> + Send {
            let this = self.clone();
            async move {
                this.finalized.lock().unwrap().push(req);
                if this.fail_finalize.load(Ordering::Relaxed) {
                    Err(TransportError::Request("backend unavailable".into()))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn limits(max_files: usize) -> UploadLimits {
        UploadLimits {
            max_concurrent_files: max_files,
            ..Default::default()
        }
    }

    fn setup(
        max_files: usize,
    ) -> (UploadManager, Arc<MockTransport>, mpsc::Receiver<Notification>) {
        setup_with(limits(max_files))
    }

    fn setup_with(
        limits: UploadLimits,
    ) -> (UploadManager, Arc<MockTransport>, mpsc::Receiver<Notification>) {
        let transport = Arc::new(MockTransport::default());
        let (notify_tx, notify_rx) = mpsc::channel(16);
        let manager = UploadManager::run("sales", transport.clone(), limits, notify_tx);
        (manager, transport, notify_rx)
    }

    fn file(name: &str) -> FileUpload {
        FileUpload::new(name, vec![0u8; 8])
    }

    // 虚拟时钟下所有任务空转后 sleep 立即推进
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn uploading(pct: f64) -> ProgressEvent {
        ProgressEvent {
            status: UploadStatus::Uploading,
            percentage: Some(pct),
            upload_id: Some("mp-1".into()),
            physical_address: Some("bucket/obj-1".into()),
            total_time: None,
        }
    }

    fn finished(secs: u64) -> ProgressEvent {
        ProgressEvent {
            status: UploadStatus::Finished,
            percentage: Some(100.0),
            upload_id: None,
            physical_address: None,
            total_time: Some(Duration::from_secs(secs)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn admission_never_exceeds_limit() {
        let (manager, transport, _notify) = setup(2);
        manager
            .submit(vec![file(A), file(B), file(C), file(D)])
            .await
            .unwrap();
        settle().await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.active_uploads, 2);
        assert_eq!(transport.started_paths(), vec![A, B]);
        assert_eq!(snapshot.queued_files, vec![C, D]);
        // 活跃状态的任务数始终等于占用的槽位数
        let active_tasks = snapshot
            .tasks
            .iter()
            .filter(|t| t.status.is_active())
            .count();
        assert_eq!(active_tasks, snapshot.active_uploads);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_is_strict_fifo() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A)]).await.unwrap();
        manager.submit(vec![file(B)]).await.unwrap();
        manager.submit(vec![file(C)]).await.unwrap();
        settle().await;
        assert_eq!(transport.started_paths(), vec![A]);
        assert_eq!(manager.snapshot().queued_files, vec![B, C]);

        transport
            .progress_sender(A)
            .send(Ok(finished(3)))
            .await
            .unwrap();
        settle().await;
        // 一个槽位空出来，先到的 B 先上
        assert_eq!(transport.started_paths(), vec![A, B]);
        assert_eq!(manager.snapshot().queued_files, vec![C]);

        transport
            .progress_sender(B)
            .send(Ok(finished(2)))
            .await
            .unwrap();
        settle().await;
        assert_eq!(transport.started_paths(), vec![A, B, C]);
        assert!(manager.snapshot().queued_files.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn two_slot_walkthrough() {
        let (manager, transport, _notify) = setup(2);
        manager.submit(vec![file(A), file(B), file(C)]).await.unwrap();
        settle().await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.active_uploads, 2);
        assert_eq!(snapshot.queued_files, vec![C]);

        transport
            .progress_sender(A)
            .send(Ok(finished(5)))
            .await
            .unwrap();
        settle().await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.active_uploads, 2);
        assert!(snapshot.queued_files.is_empty());
        assert_eq!(transport.started_paths(), vec![A, B, C]);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_replaces_active_upload() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A)]).await.unwrap();
        settle().await;
        manager.submit(vec![file(A)]).await.unwrap();
        settle().await;

        // 旧流被退订、旧任务被替换，槽位数保持不变
        assert_eq!(transport.started_paths(), vec![A, A]);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.active_uploads, 1);
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].status, UploadStatus::Initializing);
        // 本地取消不产生 finalize 请求
        assert!(transport.finalized().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_marks_aborted_and_promotes() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A), file(B)]).await.unwrap();
        settle().await;

        transport
            .progress_sender(A)
            .send(Err(TransportError::Stream("connection reset".into())))
            .await
            .unwrap();
        settle().await;

        let snapshot = manager.snapshot();
        let task = snapshot.task(A).unwrap();
        assert_eq!(task.status, UploadStatus::Aborted);
        assert_eq!(task.percentage, 100.0);
        assert_eq!(transport.started_paths(), vec![A, B]);
        assert_eq!(snapshot.active_uploads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_completion_counts_as_finished() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A), file(B)]).await.unwrap();
        settle().await;

        let sender = transport.progress_sender(A);
        sender.send(Ok(uploading(50.0))).await.unwrap();
        settle().await;
        drop(sender);
        transport.close_stream(A);
        settle().await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.task(A).unwrap().status, UploadStatus::Finished);
        assert_eq!(transport.started_paths(), vec![A, B]);
        assert!(*manager.watch_changes().borrow() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_stream_close_releases_no_extra_slot() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A)]).await.unwrap();
        manager.submit(vec![file(B)]).await.unwrap();
        manager.submit(vec![file(C)]).await.unwrap();
        settle().await;

        let sender = transport.progress_sender(A);
        sender.send(Ok(finished(3))).await.unwrap();
        settle().await;
        assert_eq!(transport.started_paths(), vec![A, B]);

        // A 的终态已经结算过，流随后关闭不能再放出一个槽位
        drop(sender);
        transport.close_stream(A);
        settle().await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.queued_files, vec![C]);
        assert_eq!(snapshot.active_uploads, 1);
        assert_eq!(transport.started_paths(), vec![A, B]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_abort_frees_slot_and_notifies_backend() {
        let (manager, transport, mut notify) = setup(1);
        manager.submit(vec![file(A), file(B)]).await.unwrap();
        settle().await;

        // A 还在 initializing，没有收到过任何进度
        manager.abort_upload(A).await.unwrap();
        settle().await;

        let snapshot = manager.snapshot();
        // 显式中止立即消失，没有 5 秒的缓冲
        assert!(snapshot.task(A).is_none());
        assert_eq!(transport.started_paths(), vec![A, B]);
        assert_eq!(snapshot.active_uploads, 1);

        let finalized = transport.finalized();
        assert_eq!(finalized.len(), 1);
        assert!(finalized[0].abort);
        assert_eq!(finalized[0].file_path, A);
        assert!(finalized[0].parts.is_empty());

        assert_eq!(
            notify.try_recv().unwrap(),
            Notification::Info(format!("{A} uploading has been terminated"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abort_finalize_failure_surfaces_error() {
        let (manager, transport, mut notify) = setup(1);
        transport.fail_finalize.store(true, Ordering::Relaxed);
        manager.submit(vec![file(A)]).await.unwrap();
        settle().await;

        manager.abort_upload(A).await.unwrap();
        settle().await;

        assert!(manager.snapshot().task(A).is_none());
        match notify.try_recv().unwrap() {
            Notification::Error(msg) => assert!(msg.contains(A)),
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finished_task_hidden_after_delay() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A)]).await.unwrap();
        settle().await;

        transport
            .progress_sender(A)
            .send(Ok(finished(7)))
            .await
            .unwrap();
        settle().await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.task(A).unwrap().status, UploadStatus::Finished);
        assert_eq!(
            snapshot.upload_times.get("a.bin"),
            Some(&Duration::from_secs(7))
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        let snapshot = manager.snapshot();
        assert!(snapshot.task(A).is_none());
        // 耗时记录在任务隐藏后仍然保留
        assert_eq!(
            snapshot.upload_times.get("a.bin"),
            Some(&Duration::from_secs(7))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_outlives_previous_hide_timer() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A)]).await.unwrap();
        settle().await;
        transport
            .progress_sender(A)
            .send(Ok(finished(1)))
            .await
            .unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        manager.submit(vec![file(A)]).await.unwrap();
        settle().await;

        // 原定的隐藏时刻已过，新任务不能被旧计时误删
        tokio::time::sleep(Duration::from_secs(4)).await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.task(A).unwrap().status, UploadStatus::Initializing);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(manager.snapshot().task(A).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_merge_keeps_missing_fields() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A)]).await.unwrap();
        settle().await;

        let sender = transport.progress_sender(A);
        sender.send(Ok(uploading(10.0))).await.unwrap();
        settle().await;
        sender
            .send(Ok(ProgressEvent::status(UploadStatus::Uploading)))
            .await
            .unwrap();
        settle().await;

        let snapshot = manager.snapshot();
        let task = snapshot.task(A).unwrap();
        assert_eq!(task.percentage, 10.0);
        assert_eq!(&*task.upload_id, "mp-1");
        assert_eq!(task.physical_address, "bucket/obj-1");
        assert_eq!(task.status, UploadStatus::Uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_file_rejected_without_touching_active() {
        let (manager, transport, mut notify) = setup_with(UploadLimits {
            max_concurrent_files: 1,
            single_file_max_size_mib: 1,
            ..Default::default()
        });
        manager.submit(vec![file(A)]).await.unwrap();
        settle().await;

        manager
            .submit(vec![FileUpload::new(A, vec![0u8; 2 * 1024 * 1024])])
            .await
            .unwrap();
        settle().await;

        // 超限的重复提交不得取消在途的同名上传
        assert_eq!(transport.started_paths(), vec![A]);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.task(A).unwrap().status, UploadStatus::Initializing);
        assert_eq!(snapshot.active_uploads, 1);
        match notify.try_recv().unwrap() {
            Notification::Error(msg) => assert!(msg.contains("maximum upload size")),
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn queued_entry_cancel_releases_no_slot() {
        let (manager, transport, _notify) = setup(1);
        manager.submit(vec![file(A), file(B)]).await.unwrap();
        settle().await;
        assert_eq!(manager.snapshot().queued_files, vec![B]);

        // 重新提交排队中的 B：旧排队项被丢掉，但它从未占过槽位
        manager.submit(vec![file(B)]).await.unwrap();
        settle().await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.active_uploads, 1);
        assert_eq!(snapshot.queued_files, vec![B]);
        assert_eq!(transport.started_paths(), vec![A]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_slot_limit_queues_everything() {
        let (manager, transport, _notify) = setup(0);
        manager.submit(vec![file(A), file(B)]).await.unwrap();
        settle().await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.active_uploads, 0);
        assert_eq!(snapshot.queued_files, vec![A, B]);
        assert!(transport.started_paths().is_empty());
    }
}
