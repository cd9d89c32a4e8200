//! 通用数据传输对象
//!
//! 统一响应包装、分页参数和批量操作结果；各业务的请求/响应 DTO
//! 定义在对应的 handler 模块中。

pub mod request;
pub mod response;

pub use request::{DateRangeParams, PaginationParams, SortOrder, search_pattern, validate_date_range};
pub use response::{
    ApiResponse, BulkActionResponse, CreatedResponse, DeletedResponse, PageResponse,
};
