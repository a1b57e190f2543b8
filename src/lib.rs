pub mod auth;
pub mod config;
pub mod db;
pub mod diffing;
pub mod error;
pub mod files_store;
pub mod models;
pub mod routes;
pub mod time;

use config::Config;
use db::Db;
use rocket_cors::CorsOptions;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    build_rocket(Config::from_env())
}

pub fn rocket_with_config(config: Config) -> rocket::Rocket<rocket::Build> {
    build_rocket(config)
}

fn build_rocket(config: Config) -> rocket::Rocket<rocket::Build> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }
    std::fs::create_dir_all(&config.files_dir).ok();

    let db = Db::new(&config.db_path);

    let cors = CorsOptions::default().to_cors().expect("Failed to create CORS");

    // Multipart uploads ride on the data limits below rather than the JSON limit.
    let upload_limit = config.max_file_size.min(50 * 1024 * 1024);
    let figment = rocket::Config::figment()
        .merge(("limits.file", upload_limit))
        .merge(("limits.data-form", upload_limit + 1024));

    rocket::custom(figment)
        .manage(db)
        .manage(config)
        .attach(cors)
        .register("/", rocket::catchers![routes::status::not_found, routes::status::payload_too_large])
        .mount(
            "/",
            rocket::routes![
                routes::status::index,
                routes::status::status,
                routes::status::stats,
                routes::identity::register,
                routes::identity::join,
                routes::identity::list_pending,
                routes::identity::join_status,
                routes::identity::approve,
                routes::identity::reject,
                routes::identity::list_agents,
                routes::identity::admin_list_keys,
                routes::messaging::send,
                routes::messaging::send_to_conversation,
                routes::messaging::inbox,
                routes::messaging::mark_read,
                routes::messaging::history,
                routes::messaging::create_conversation,
                routes::messaging::list_conversations,
                routes::messaging::get_conversation,
                routes::messaging::conversation_messages,
                routes::messaging::invite,
                routes::messaging::leave,
                routes::files::upload,
                routes::files::list,
                routes::files::stats,
                routes::files::info,
                routes::files::download,
                routes::files::remove,
                routes::files::send_file,
                routes::tasks::create,
                routes::tasks::list,
                routes::tasks::get,
                routes::tasks::update,
                routes::tasks::claim,
                routes::tasks::start,
                routes::tasks::complete,
                routes::tasks::block,
                routes::tasks::add_comment,
                routes::tasks::list_comments,
                routes::tasks::get_history,
                routes::tasks::add_dependency,
                routes::tasks::get_dependencies,
                routes::tasks::remove_dependency,
                routes::tasks::my_active,
                routes::tasks::my_feed,
                routes::tasks::board,
                routes::projects::create,
                routes::projects::list,
                routes::projects::get,
                routes::projects::add_member,
                routes::projects::add_milestone,
                routes::projects::list_milestones,
                routes::revisions::create_repo,
                routes::revisions::list_repos,
                routes::revisions::get_repo,
                routes::revisions::commit,
                routes::revisions::tree,
                routes::revisions::read_file,
                routes::revisions::log,
                routes::revisions::diff,
            ],
        )
}
