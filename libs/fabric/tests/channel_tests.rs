mod common;

use std::time::Duration;

use futures_util::StreamExt;
use switchboard_core::{Code, StatusError};
use switchboard_fabric::channel::{bi_channel, channel};
use switchboard_fabric::error::Error;

use common::within;

#[tokio::test]
async fn buffered_values_arrive_in_order_before_close() {
    let (tx, mut rx) = channel();
    tx.send(1).unwrap();
    tx.send(2).unwrap();
    tx.send(3).unwrap();
    tx.close();

    assert_eq!(rx.recv().await, Some(Ok(1)));
    assert_eq!(rx.recv().await, Some(Ok(2)));
    assert_eq!(rx.recv().await, Some(Ok(3)));
    assert_eq!(rx.recv().await, None);
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn fail_discards_buffered_values() {
    let (tx, mut rx) = channel();
    tx.send("a").unwrap();
    tx.send("b").unwrap();
    tx.fail(StatusError::internal("boom"));

    assert_eq!(rx.pending_len(), 0);
    assert_eq!(rx.try_recv_now(), Some(Err(StatusError::internal("boom"))));
    assert_eq!(rx.recv().await, Some(Err(StatusError::internal("boom"))));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn send_after_close_or_fail_is_rejected() {
    let (tx, _rx) = channel();
    tx.close();
    assert!(matches!(tx.send(1), Err(Error::ChannelClosed(None))));

    let (tx, _rx) = channel();
    tx.fail(StatusError::unavailable("gone"));
    match tx.send(1) {
        Err(Error::ChannelClosed(Some(err))) => assert_eq!(err.code, Code::Unavailable),
        other => panic!("unexpected send result: {other:?}"),
    }
}

#[tokio::test]
async fn send_and_close_is_a_single_step() {
    let (tx, mut rx) = channel();
    tx.send_and_close(7).unwrap();
    assert!(tx.is_closed());
    assert!(!rx.is_done());

    assert_eq!(rx.recv().await, Some(Ok(7)));
    assert!(rx.is_done());
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn second_close_or_fail_is_a_no_op() {
    let (tx, mut rx) = channel::<u8>();
    tx.close();
    tx.fail(StatusError::internal("late"));
    tx.close();
    assert_eq!(rx.recv().await, None);

    let (tx, mut rx) = channel::<u8>();
    tx.fail(StatusError::internal("first"));
    tx.fail(StatusError::internal("second"));
    tx.close();
    assert_eq!(rx.recv().await, Some(Err(StatusError::internal("first"))));
}

#[tokio::test]
async fn pending_receive_wakes_on_send() {
    let (tx, mut rx) = channel();
    let receiver = tokio::spawn(async move { rx.recv().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send("late").unwrap();

    assert_eq!(within(receiver).await.unwrap(), Some(Ok("late")));
}

#[tokio::test]
async fn pending_receive_wakes_on_fail() {
    let (tx, mut rx) = channel::<u32>();
    let receiver = tokio::spawn(async move { rx.recv().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.fail(StatusError::cancelled("stop"));

    assert_eq!(
        within(receiver).await.unwrap(),
        Some(Err(StatusError::cancelled("stop")))
    );
}

#[tokio::test]
async fn opened_resolves_on_explicit_open() {
    let (tx, rx) = channel::<u32>();
    let waiter = tokio::spawn(async move {
        rx.opened().await;
        rx.pending_len()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    tx.open();
    tx.open();

    assert_eq!(within(waiter).await.unwrap(), 0);
}

#[tokio::test]
async fn opened_resolves_on_send_and_close() {
    let (tx, rx) = channel();
    tx.send(1).unwrap();
    within(rx.opened()).await;

    let (tx, rx) = channel::<u32>();
    tx.close();
    within(rx.opened()).await;
}

#[tokio::test]
async fn peek_first_does_not_consume() {
    let (tx, mut rx) = channel();
    let peeker = tokio::spawn(async move {
        let first = rx.peek_first().await;
        (first, rx)
    });
    tx.send("x".to_string()).unwrap();

    let (first, mut rx) = within(peeker).await.unwrap();
    assert_eq!(first, Some(Ok("x".to_string())));
    assert_eq!(rx.pending_len(), 1);
    assert_eq!(rx.recv().await, Some(Ok("x".to_string())));

    tx.close();
    assert_eq!(rx.peek_first().await, None);
}

#[tokio::test]
async fn pending_len_is_visible_on_both_ends() {
    let (tx, rx) = channel();
    for i in 0..5 {
        tx.send(i).unwrap();
    }
    assert_eq!(tx.pending_len(), 5);
    assert_eq!(rx.pending_len(), 5);
    assert_eq!(rx.try_recv_now(), Some(Ok(0)));
    assert_eq!(tx.pending_len(), 4);
}

#[tokio::test]
async fn receiver_side_fail_rejects_sender() {
    let (tx, rx) = channel::<u32>();
    rx.fail(StatusError::cancelled("not interested"));
    assert!(tx.is_closed());
    assert!(tx.send(1).is_err());
}

#[tokio::test]
async fn bi_channel_crosses_directions() {
    let ((left_tx, mut left_rx), (right_tx, mut right_rx)) = bi_channel::<&str, u32>();
    left_tx.send("ping").unwrap();
    right_tx.send(42).unwrap();

    assert_eq!(right_rx.recv().await, Some(Ok("ping")));
    assert_eq!(left_rx.recv().await, Some(Ok(42)));
}

#[tokio::test]
async fn receiver_is_a_stream() {
    let (tx, rx) = channel();
    tx.send(1).unwrap();
    tx.send(2).unwrap();
    tx.fail(StatusError::data_loss("cut"));

    let items: Vec<_> = rx.collect().await;
    assert_eq!(items, vec![Err(StatusError::data_loss("cut"))]);

    let (tx, rx) = channel();
    tx.send(1).unwrap();
    tx.send_and_close(2).unwrap();
    let items: Vec<_> = rx.collect().await;
    assert_eq!(items, vec![Ok(1), Ok(2)]);
}

#[tokio::test]
async fn dropping_the_last_sender_closes() {
    let (tx, mut rx) = channel();
    let clone = tx.clone();
    tx.send(1).unwrap();
    drop(tx);
    assert!(!rx.is_closed());

    clone.send(2).unwrap();
    drop(clone);

    assert_eq!(within(rx.recv()).await, Some(Ok(1)));
    assert_eq!(within(rx.recv()).await, Some(Ok(2)));
    assert_eq!(within(rx.recv()).await, None);
}

#[tokio::test]
async fn dropping_a_sender_wakes_a_pending_receive() {
    let (tx, mut rx) = channel::<u32>();
    let receiver = tokio::spawn(async move { rx.recv().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(tx);

    assert_eq!(within(receiver).await.unwrap(), None);
}

#[tokio::test]
async fn dropping_the_receiver_rejects_sends() {
    let (tx, rx) = channel();
    tx.send(1).unwrap();
    drop(rx);

    assert!(tx.is_closed());
    assert_eq!(tx.pending_len(), 0);
    match tx.send(2) {
        Err(Error::ChannelClosed(Some(err))) => assert_eq!(err.code, Code::Cancelled),
        other => panic!("unexpected send result: {other:?}"),
    }
}
