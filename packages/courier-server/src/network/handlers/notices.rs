//! REST operations on the calling receiver's notices.
//!
//! Every route resolves the receiver from the request first and answers
//! 401 without one. Mutations answer 200 with an empty body, whether or not
//! anything changed.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use courier_core::{NoticeId, NoticeView, UnreadStatus};

use super::{ApiError, AppState};

/// `GET /notices/me/unread`
pub async fn notices_unread_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<NoticeView>>, ApiError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let receiver = state.receiver(&headers, None)?;
    Ok(Json(state.hub.notices().get_unread_notices(receiver).await?))
}

/// `GET /notices/me/all`
pub async fn notices_all_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<NoticeView>>, ApiError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let receiver = state.receiver(&headers, None)?;
    Ok(Json(state.hub.notices().get_all_notices(receiver).await?))
}

/// `GET /notices/check`
pub async fn check_unread_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UnreadStatus>, ApiError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let receiver = state.receiver(&headers, None)?;
    Ok(Json(state.hub.notices().check_unread_status(receiver).await?))
}

/// `PUT /notices/mark-read/{noticeId}`
pub async fn mark_read_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notice_id): Path<NoticeId>,
) -> Result<StatusCode, ApiError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let receiver = state.receiver(&headers, None)?;
    state.hub.notices().mark_as_read(receiver, notice_id).await?;
    Ok(StatusCode::OK)
}

/// `PUT /notices/mark-all-read`
pub async fn mark_all_read_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let receiver = state.receiver(&headers, None)?;
    state.hub.notices().mark_all_as_read(receiver).await?;
    Ok(StatusCode::OK)
}

/// `DELETE /notices/{noticeId}`
pub async fn delete_notice_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notice_id): Path<NoticeId>,
) -> Result<StatusCode, ApiError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let receiver = state.receiver(&headers, None)?;
    state.hub.notices().delete_notice(receiver, notice_id).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use courier_core::{DeliveryStatus, NoticeEvent, UserId};

    use super::super::test_support;
    use super::*;
    use crate::error::CourierError;
    use crate::network::identity::USER_ID_HEADER;
    use crate::traits::DeliveryStore;

    fn as_user(id: u64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, id.to_string().parse().unwrap());
        headers
    }

    async fn seeded() -> (AppState, NoticeId) {
        let state = test_support::state();
        let store = state.hub.store();
        store.upsert_receiver(UserId(1), "Ada").await.unwrap();
        store.upsert_receiver(UserId(2), "Bob").await.unwrap();
        let report = state
            .hub
            .notices()
            .notify(&NoticeEvent::task_assigned(UserId(1), UserId(2), 9, "Plan"))
            .await
            .unwrap()
            .unwrap();
        (state, report.notice_id)
    }

    #[tokio::test]
    async fn unread_requires_identity() {
        let (state, _) = seeded().await;
        let err = notices_unread_handler(State(state), HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err.0, CourierError::Unauthorized));
    }

    #[tokio::test]
    async fn unread_then_mark_read() {
        let (state, notice_id) = seeded().await;

        let unread = notices_unread_handler(State(state.clone()), as_user(2))
            .await
            .unwrap()
            .0;
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].notice_id, notice_id);

        let status = check_unread_handler(State(state.clone()), as_user(2))
            .await
            .unwrap()
            .0;
        assert_eq!(status.unread_count, 1);

        let code = mark_read_handler(State(state.clone()), as_user(2), Path(notice_id))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::OK);

        let all = notices_all_handler(State(state.clone()), as_user(2))
            .await
            .unwrap()
            .0;
        assert_eq!(all[0].status, DeliveryStatus::Viewed);

        let status = check_unread_handler(State(state), as_user(2)).await.unwrap().0;
        assert!(!status.has_unread);
    }

    #[tokio::test]
    async fn mark_all_and_delete() {
        let (state, notice_id) = seeded().await;

        mark_all_read_handler(State(state.clone()), as_user(2))
            .await
            .unwrap();
        let unread = notices_unread_handler(State(state.clone()), as_user(2))
            .await
            .unwrap()
            .0;
        assert!(unread.is_empty());

        delete_notice_handler(State(state.clone()), as_user(2), Path(notice_id))
            .await
            .unwrap();
        let all = notices_all_handler(State(state), as_user(2)).await.unwrap().0;
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn other_receiver_sees_nothing() {
        let (state, notice_id) = seeded().await;

        mark_read_handler(State(state.clone()), as_user(1), Path(notice_id))
            .await
            .unwrap();
        let all = notices_all_handler(State(state.clone()), as_user(1)).await.unwrap().0;
        assert!(all.is_empty());

        let unread = notices_unread_handler(State(state), as_user(2)).await.unwrap().0;
        assert_eq!(unread.len(), 1);
    }
}
