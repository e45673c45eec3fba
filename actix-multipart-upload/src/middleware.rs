//! For middleware documentation, see [`Multipart`].

use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;

use crate::{
    extractor::handle_error, parser::Parser, upload, Files, FormBody, MultipartConfig,
};

/// Middleware that reads `multipart/*` request bodies before the handler runs.
///
/// Form fields end up in [`FormBody`] and stored files in [`Files`], both
/// available as extractors. Requests with any other content type pass through
/// untouched. If a field, a file or the body itself fails, the first error is
/// returned once every started storage operation has settled, and the handler
/// is not called.
///
/// # Examples
/// ```
/// use actix_multipart_upload::{Files, FormBody, MemoryStorage, Multipart, MultipartConfig};
/// use actix_web::{web, App, HttpResponse};
///
/// async fn upload(files: Files, body: FormBody) -> HttpResponse {
///     HttpResponse::Ok().body(format!("{} files, {} fields", files.len(), body.len()))
/// }
///
/// let app = App::new()
///     .wrap(Multipart::new(MultipartConfig::new(MemoryStorage).max_num_files(5)))
///     .route("/upload", web::post().to(upload));
/// ```
#[derive(Clone)]
pub struct Multipart {
    config: Rc<MultipartConfig>,
}

impl Multipart {
    pub fn new(config: MultipartConfig) -> Self {
        Multipart {
            config: Rc::new(config),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Multipart
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = MultipartMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MultipartMiddleware {
            service: Rc::new(service),
            config: Rc::clone(&self.config),
        }))
    }
}

pub struct MultipartMiddleware<S> {
    service: Rc<S>,
    config: Rc<MultipartConfig>,
}

fn is_multipart(req: &ServiceRequest) -> bool {
    matches!(req.mime_type(), Ok(Some(mime)) if mime.type_() == mime::MULTIPART)
}

impl<S, B> Service<ServiceRequest> for MultipartMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        if !is_multipart(&req) {
            return Box::pin(async move { service.call(req).await });
        }

        let config = Rc::clone(&self.config);
        let payload = req.take_payload();
        let parser = Parser::new(req.headers(), payload, config.limits());
        let request = req.request().clone();

        Box::pin(async move {
            let collected = upload::collect(parser, Rc::clone(&config.storage), request)
                .await
                .map_err(|err| handle_error(err, &config))?;

            {
                let mut extensions = req.extensions_mut();
                let mut body = extensions.remove::<FormBody>().unwrap_or_default();
                body.extend(collected.fields);
                extensions.insert(body);
                extensions.insert(Files(collected.files));
            }

            service.call(req).await
        })
    }
}
