use crate::item::{BookRecord, StoreError, ValidationError};
use std::fmt;
use std::fmt::{Display, Formatter};

/// 승인 등 단일 도서 작업의 에러
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// 대상 도서가 없음
    NotFound(String),

    Store(StoreError),
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::NotFound(id) => write!(f, "Book not found: {}", id),
            LifecycleError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl From<StoreError> for LifecycleError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => LifecycleError::NotFound(id),
            e => LifecycleError::Store(e),
        }
    }
}

/// 교환 중 1단계(원본 도서 교환 완료 처리)는 성공 했지만 2단계(교환 받은 도서 등록)에 실패한 상태
///
/// 원본 도서는 되돌리지 않으므로 [`crate::lifecycle::retry_replacement`]로 2단계만 다시 시도해야 한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSwap {
    source_id: String,
    replacement: BookRecord,
    cause: StoreError,
}

impl PartialSwap {
    pub fn new(source_id: &str, replacement: BookRecord, cause: StoreError) -> Self {
        Self {
            source_id: source_id.to_owned(),
            replacement,
            cause,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// 아직 저장 되지 않은 교환 받은 도서
    pub fn replacement(&self) -> &BookRecord {
        &self.replacement
    }

    pub fn cause(&self) -> &StoreError {
        &self.cause
    }
}

/// 교환 에러 열거
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapError {
    /// 교환 받은 도서 정보가 올바르지 않음. 아무것도 저장 되지 않는다.
    Invalid(ValidationError),

    /// 원본 도서가 없음
    NotFound(String),

    /// 원본 도서가 이미 교환 되었음
    AlreadySwapped(String),

    /// 1단계에서 실패. 아무것도 바뀌지 않았으므로 교환 전체를 다시 시도해도 된다.
    Failed(StoreError),

    /// 2단계에서 실패
    Partial(PartialSwap),
}

impl Display for SwapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SwapError::Invalid(e) => write!(f, "Invalid replacement: {}", e),
            SwapError::NotFound(id) => write!(f, "Book not found: {}", id),
            SwapError::AlreadySwapped(id) => write!(f, "Book already swapped: {}", id),
            SwapError::Failed(e) => write!(f, "Swap failed: {}", e),
            SwapError::Partial(partial) => write!(
                f,
                "Book {} was marked as swapped but the replacement was not created: {}",
                partial.source_id, partial.cause
            ),
        }
    }
}

impl std::error::Error for SwapError {}
