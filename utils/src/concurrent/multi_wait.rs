use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_condvar::Condvar;

/// The failure type produced by work functions adapted through a completer.<br/>
/// コンプリータ経由で実行されるワーク関数が返す失敗型。
pub type WorkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error returned from [`MultiWait::wait`] or [`MultiWait::wait_timeout`].<br/>
/// [`MultiWait::wait`]・[`MultiWait::wait_timeout`]が返すエラー。
#[derive(Error, Debug, Clone)]
pub enum MultiWaitError {
  /// The bounded wait elapsed before all completions arrived. The round stays
  /// open; a later wait on the same latch can still succeed.
  #[error("timed out waiting for completions")]
  Timeout,
  /// The first failure recorded during the round, replayed to every waiter
  /// released by the completion count.
  #[error("work failed: {0}")]
  Work(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

#[derive(Debug)]
struct State {
  count: usize,
  completed: usize,
  failure: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

/// A latch that blocks waiters until a known number of independently running
/// units of work have each signaled completion, capturing the first failure
/// among them.<br/>
/// 既知の数のワークがそれぞれ完了を通知するまで待機側をブロックし、最初の失敗を
/// 捕捉するラッチ。
///
/// `MultiWait` is deliberately not `Clone`. Share it through an `Arc` and use
/// [`MultiWait::shared_completer`] when a completer must co-own the latch.
pub struct MultiWait {
  state: Mutex<State>,
  condvar: Condvar,
}

impl Debug for MultiWait {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MultiWait")
      .field("state", &self.state)
      .finish()
  }
}

impl MultiWait {
  pub fn new(count: usize) -> Self {
    Self {
      state: Mutex::new(State {
        count,
        completed: 0,
        failure: None,
      }),
      condvar: Condvar::new(),
    }
  }

  /// Registers one completion. Signaling past the target keeps the latch
  /// satisfied and is not an error.
  pub async fn done(&self) {
    let notify = {
      let mut state = self.state.lock().await;
      state.completed += 1;
      state.completed == state.count
    };
    // Notify outside the lock so released waiters can re-lock immediately.
    if notify {
      self.condvar.notify_all();
    }
  }

  /// Waits until every expected completion has been registered, then returns
  /// the first failure of the round, if any. All concurrent waiters are
  /// released together once the count is reached.
  pub async fn wait(&self) -> Result<(), MultiWaitError> {
    let mut state = self.state.lock().await;
    while state.completed < state.count {
      state = self.condvar.wait(state).await;
    }
    match &state.failure {
      Some(failure) => Err(MultiWaitError::Work(failure.clone())),
      None => Ok(()),
    }
  }

  /// Same as [`MultiWait::wait`], bounded by `timeout`. On expiry returns
  /// [`MultiWaitError::Timeout`] and leaves the completion count and any
  /// stored failure untouched.
  pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), MultiWaitError> {
    match tokio::time::timeout(timeout, self.wait()).await {
      Ok(result) => result,
      Err(_) => {
        tracing::trace!(?timeout, "multi_wait: bounded wait elapsed");
        Err(MultiWaitError::Timeout)
      }
    }
  }

  /// Starts a new round: sets a fresh target, zeroes the completion count and
  /// discards any stored failure.<br/>
  /// 新しいラウンドを開始する。ターゲットを設定し直し、完了数と保持中の失敗を
  /// クリアする。
  ///
  /// Callers must ensure no task is still blocked in a wait and no completer
  /// from the previous round can still run; the latch does not check this.
  pub async fn reset(&self, count: usize) {
    let mut state = self.state.lock().await;
    state.count = count;
    state.completed = 0;
    state.failure = None;
  }

  /// Wraps `work` into a future that records its failure (first one wins) and
  /// always registers one completion afterwards, on the success and failure
  /// paths alike. A failure never propagates out of the returned future, so
  /// the executor running it is never destabilized.<br/>
  /// `work`をラップし、失敗を記録（先着優先）した上で必ず完了を1つ登録する
  /// フューチャーを返す。
  ///
  /// The returned future borrows this latch; the caller guarantees the latch
  /// outlives every execution (structured use such as `join_all`). For
  /// futures handed to a spawning executor, use
  /// [`MultiWait::shared_completer`].
  pub fn completer<'a, F, Fut>(&'a self, work: F) -> impl Future<Output = ()> + 'a
  where
    F: FnOnce() -> Fut + 'a,
    Fut: Future<Output = Result<(), WorkError>> + 'a, {
    async move {
      if let Err(failure) = work().await {
        self.record_failure(failure).await;
      }
      self.done().await;
    }
  }

  /// Same as [`MultiWait::completer`], but the returned future co-owns the
  /// latch through the given `Arc`, so it may outlive the scope that created
  /// the latch (e.g. when handed to `tokio::spawn`).<br/>
  /// [`MultiWait::completer`]と同様だが、返されるフューチャーが`Arc`を介して
  /// ラッチを共同所有するため、生成元スコープより長生きできる。
  pub fn shared_completer<F, Fut>(self: Arc<Self>, work: F) -> impl Future<Output = ()> + Send + 'static
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static, {
    async move {
      if let Err(failure) = work().await {
        self.record_failure(failure).await;
      }
      self.done().await;
    }
  }

  // The lock is never held across `work`; only across this store.
  async fn record_failure(&self, failure: WorkError) {
    let mut state = self.state.lock().await;
    if state.failure.is_none() {
      state.failure = Some(Arc::from(failure));
    }
  }
}
