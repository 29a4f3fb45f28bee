use std::{io, time::Duration};

use rustls::{AlertDescription, Error as RustlsError};
use sealport_transport::{
    EngineError, ErrorCategory, OperationKind, SecurityClass, error::categorize_io_error,
};

/// rustls 错误映射。
///
/// 会话引擎只会从两处拿到 `rustls::Error`：建立连接（`ClientConnection::new`/
/// `ServerConnection::new`）与处理对端记录（`process_new_packets`）。分类只区分这两处
/// 实际可能出现的错误，其余一律视为不可重试。
pub(crate) fn map_rustls_error(kind: OperationKind, error: RustlsError) -> EngineError {
    let category = categorize_rustls_error(&error);
    EngineError::new(kind, error.to_string())
        .with_category(category)
        .with_source(error)
}

/// `read_tls`/`write_tls` 失败时的映射；`process_new_packets` 的错误可能包在 `io::Error` 里。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> EngineError {
    let category = categorize_with_rustls(&error);
    EngineError::new(kind, error.to_string())
        .with_category(category)
        .with_source(error)
}

fn categorize_with_rustls(error: &io::Error) -> ErrorCategory {
    if let Some(source) = error.get_ref()
        && let Some(rustls_error) = source.downcast_ref::<RustlsError>()
    {
        return categorize_rustls_error(rustls_error);
    }
    categorize_io_error(error)
}

pub(crate) fn categorize_rustls_error(error: &RustlsError) -> ErrorCategory {
    match error {
        RustlsError::AlertReceived(alert) => categorize_alert(*alert),
        RustlsError::InvalidCertificate(_) | RustlsError::NoCertificatesPresented => {
            ErrorCategory::Security(SecurityClass::Authentication)
        }
        RustlsError::DecryptError
        | RustlsError::InvalidMessage(_)
        | RustlsError::InappropriateMessage { .. }
        | RustlsError::InappropriateHandshakeMessage { .. }
        | RustlsError::PeerMisbehaved(_)
        | RustlsError::PeerSentOversizedRecord => ErrorCategory::Security(SecurityClass::Integrity),
        RustlsError::PeerIncompatible(_) | RustlsError::NoApplicationProtocol => {
            ErrorCategory::ProtocolViolation
        }
        RustlsError::FailedToGetRandomBytes => ErrorCategory::ResourceExhausted,
        _ => ErrorCategory::NonRetryable,
    }
}

/// 对端告警按含义归类；关闭类告警不是安全事件。
fn categorize_alert(alert: AlertDescription) -> ErrorCategory {
    if is_certificate_alert(alert) {
        return ErrorCategory::Security(SecurityClass::Authentication);
    }
    match alert {
        AlertDescription::AccessDenied => ErrorCategory::Security(SecurityClass::Authorization),
        AlertDescription::BadRecordMac
        | AlertDescription::DecryptError
        | AlertDescription::DecodeError
        | AlertDescription::RecordOverflow
        | AlertDescription::UnexpectedMessage
        | AlertDescription::IllegalParameter => ErrorCategory::Security(SecurityClass::Integrity),
        AlertDescription::HandshakeFailure
        | AlertDescription::ProtocolVersion
        | AlertDescription::InsufficientSecurity => ErrorCategory::ProtocolViolation,
        AlertDescription::CloseNotify | AlertDescription::UserCanceled => {
            ErrorCategory::Retryable(Duration::from_millis(50))
        }
        _ => ErrorCategory::NonRetryable,
    }
}

fn is_certificate_alert(alert: AlertDescription) -> bool {
    matches!(
        alert,
        AlertDescription::BadCertificate
            | AlertDescription::UnsupportedCertificate
            | AlertDescription::CertificateRevoked
            | AlertDescription::CertificateExpired
            | AlertDescription::CertificateUnknown
            | AlertDescription::CertificateRequired
            | AlertDescription::UnknownCA
    )
}
