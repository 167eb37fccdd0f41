use actix_web::web::Data;
use actix_web::{get, App, HttpResponse, HttpServer, Responder};
use tera::{Context, Tera};

use crate::node::state::NodeState;
use crate::utils::config::Config;
use crate::utils::crypto::mask;

/// Read-only HTML status page rendering the node's routing state.
#[get("/")]
pub async fn index(state: Data<NodeState>, config: Data<Config>) -> impl Responder {
    let tera = Tera::new("static/html/**/*").unwrap();
    let mut context = Context::new();

    context.insert("title", "Chord Node");
    context.insert("config", config.get_ref());
    context.insert("node", state.own());
    context.insert("predecessor", &state.predecessor().to_string());
    context.insert("fingers", &state.fingers_snapshot());
    context.insert("successors", &state.successors_snapshot());
    context.insert("max_pos", &mask(state.bits()));

    let rendered_html = tera.render("index.html", &context).unwrap();

    HttpResponse::Ok()
        .content_type("text/html")
        .body(rendered_html)
}

pub async fn serve(bind_address: String, config: Config, state: NodeState) -> std::io::Result<()> {
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .app_data(Data::new(config.clone()))
            .service(index)
    })
    .bind(bind_address)?
    .run()
    .await
}
