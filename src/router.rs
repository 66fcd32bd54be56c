use actix_web::web;

/// 路由配置包装 / Route configuration wrapper
pub fn configure(cfg: &mut web::ServiceConfig) {
    crate::api::v1::health::register(cfg, "/v1/health");
    // typing先于presence注册：/v1/presence/typing不能落进{user_id}
    // typing registers before presence: /v1/presence/typing must not fall
    // into {user_id}
    crate::api::v1::typing::register(cfg, "/v1/presence/typing");
    crate::api::v1::presence::register(cfg, "/v1/presence");
    crate::api::v1::chats::register(cfg, "/v1/chats");
    crate::api::v1::messages::register(cfg, "/v1/messages");
}
