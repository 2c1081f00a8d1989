use super::{
    errors::SpawnError,
    result::SpawnResult,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll}
};
use tokio::{
    sync::oneshot::{self, error::TryRecvError},
    time::Duration,
};
use tokio_util::sync::CancellationToken;


/// Handle на задачу в пуле: ожидание результата, timeout и отмена до старта
pub struct JoinHandle<T> {
    cancel_token: CancellationToken,
    receiver: oneshot::Receiver<SpawnResult<T>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(
        cancel_token: CancellationToken,
        receiver: oneshot::Receiver<SpawnResult<T>>,
    ) -> Self {
        Self {
            cancel_token,
            receiver,
        }
    }

    /// Отмена. Задача, которая ещё не стартовала, завершится с `SpawnError::Cancelled`
    #[inline]
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Результат без ожидания; `None`, если задача ещё не дошла до конца
    pub fn try_result(&mut self) -> Option<SpawnResult<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(SpawnError::ChannelClosed)),
        }
    }

    pub async fn await_timeout(self, timeout: Duration) -> SpawnResult<T> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SpawnError::ChannelClosed),
            Err(_) => Err(SpawnError::Timeout),
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = SpawnResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(SpawnError::ChannelClosed))),
            Poll::Pending => Poll::Pending,
        }
    }
}
