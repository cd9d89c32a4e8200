//! 统一响应结构

use serde::Serialize;
use uuid::Uuid;

use super::PaginationParams;

/// 分页响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> PageResponse<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };

        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }

    /// 按分页参数（已规整后的 page / limit）构造
    pub fn from_params(items: Vec<T>, total: i64, params: &PaginationParams) -> Self {
        Self::new(items, total, params.page(), params.limit())
    }

    pub fn empty(page: i64, page_size: i64) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page,
            page_size,
            total_pages: 0,
        }
    }
}

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_empty() -> ApiResponse<()> {
        ApiResponse {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: None,
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 创建成功响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub id: Uuid,
}

impl CreatedResponse {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}

/// 删除成功响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub deleted: bool,
}

/// 批量操作结果
///
/// 逐条执行，单条失败不影响其他条目
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionResponse {
    pub success: bool,
    pub processed: usize,
    pub failed: usize,
    pub results: Vec<Uuid>,
    pub errors: Vec<BulkActionError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionError {
    pub id: Uuid,
    pub code: String,
    pub message: String,
}

impl BulkActionResponse {
    pub fn record_ok(&mut self, id: Uuid) {
        self.processed += 1;
        self.results.push(id);
    }

    pub fn record_err(&mut self, id: Uuid, err: &crate::error::AdminError) {
        self.failed += 1;
        self.errors.push(BulkActionError {
            id,
            code: err.error_code().to_string(),
            message: err.to_string(),
        });
    }

    /// 全部成功时 success 为 true
    pub fn finish(mut self) -> Self {
        self.success = self.failed == 0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdminError;

    #[test]
    fn test_page_response_total_pages_calculation() {
        let response = PageResponse::<i32>::new(vec![], 100, 1, 10);
        assert_eq!(response.total_pages, 10);

        let response = PageResponse::<i32>::new(vec![], 101, 1, 10);
        assert_eq!(response.total_pages, 11);

        let response = PageResponse::<i32>::empty(1, 10);
        assert_eq!(response.total_pages, 0);
    }

    #[test]
    fn test_page_response_from_params_normalizes() {
        let params = PaginationParams { page: 0, page_size: 1000 };
        let response = PageResponse::from_params(vec![1, 2], 2, &params);
        assert_eq!(response.page, 1);
        assert_eq!(response.page_size, 100);
        assert_eq!(response.total_pages, 1);
    }

    #[test]
    fn test_api_response_serialization() {
        let id = Uuid::nil();
        let response = ApiResponse::success(CreatedResponse::new(id));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["code"], "SUCCESS");
        assert_eq!(json["data"]["id"], id.to_string());

        let empty = ApiResponse::<()>::success_empty();
        let json = serde_json::to_value(&empty).unwrap();
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_bulk_action_response() {
        let mut bulk = BulkActionResponse::default();
        bulk.record_ok(Uuid::new_v4());
        bulk.record_err(Uuid::new_v4(), &AdminError::AlreadyApproved);
        let bulk = bulk.finish();

        assert!(!bulk.success);
        assert_eq!(bulk.processed, 1);
        assert_eq!(bulk.failed, 1);
        assert_eq!(bulk.errors[0].code, "ALREADY_APPROVED");

        let json = serde_json::to_value(&bulk).unwrap();
        assert!(json.get("results").is_some());
    }
}
