use bytes::Bytes;
use http::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
};
use http::{Request, Response, StatusCode};
use staticache::*;
use std::sync::Arc;
use std::thread;

fn archive_engine(files: &[(&str, Vec<u8>)]) -> StaticEngine {
    let archive = files
        .iter()
        .fold(EmbeddedArchive::new(), |archive, (path, data)| {
            archive.with_file(path, data.clone())
        });
    StaticEngine::new(ServingConfig::archive(archive).with_compression_min_size(1))
}

fn send(engine: &StaticEngine, req: Request<()>) -> Response<Bytes> {
    engine.handle(&req).into_response().expect("declined")
}

#[cfg(test)]
mod conditional_edge_case_tests {
    use super::*;

    #[test]
    fn test_malformed_conditional_headers() {
        let engine = archive_engine(&[("a.txt", b"hello".to_vec())]);
        for (name, value) in [
            (IF_MODIFIED_SINCE, "not a date"),
            (IF_MODIFIED_SINCE, ""),
            (IF_NONE_MATCH, "W/"),
            (IF_NONE_MATCH, "\"\""),
        ] {
            let req = Request::get("/a.txt").header(name, value).body(()).unwrap();
            assert_eq!(send(&engine, req).status(), StatusCode::OK);
        }
        println!("✓ Garbage validators fall through to 200");
    }

    #[test]
    fn test_very_large_etag_header() {
        let engine = archive_engine(&[("a.txt", b"hello".to_vec())]);
        let huge = format!("\"{}\"", "a".repeat(8000));
        let req = Request::get("/a.txt")
            .header(IF_NONE_MATCH, huge.as_str())
            .body(())
            .unwrap();
        assert_eq!(send(&engine, req).status(), StatusCode::OK);
        println!("✓ Oversized If-None-Match ignored");
    }

    #[test]
    fn test_etag_in_list_matches() {
        let engine = archive_engine(&[("a.txt", b"hello".to_vec())]);
        let first = send(&engine, Request::get("/a.txt").body(()).unwrap());
        let etag = first.headers()[ETAG].to_str().unwrap().to_string();

        let list = format!("\"nope\", {etag}, \"other\"");
        let req = Request::get("/a.txt")
            .header(IF_NONE_MATCH, list.as_str())
            .body(())
            .unwrap();
        assert_eq!(send(&engine, req).status(), StatusCode::NOT_MODIFIED);
        println!("✓ ETag lists handled");
    }

    #[test]
    fn test_concurrent_conditional_requests() {
        let engine = Arc::new(archive_engine(&[("a.txt", b"hello".repeat(300))]));
        let etag = send(&engine, Request::get("/a.txt").body(()).unwrap()).headers()[ETAG]
            .to_str()
            .unwrap()
            .to_string();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let etag = etag.clone();
                thread::spawn(move || {
                    let mut builder = Request::get("/a.txt").header(ACCEPT_ENCODING, "gzip, zstd");
                    if i % 2 == 0 {
                        builder = builder.header(IF_NONE_MATCH, etag.as_str());
                    }
                    let res = send(&engine, builder.body(()).unwrap());
                    (i, res.status())
                })
            })
            .collect();

        for handle in handles {
            let (i, status) = handle.join().unwrap();
            let expected = if i % 2 == 0 {
                StatusCode::NOT_MODIFIED
            } else {
                StatusCode::OK
            };
            assert_eq!(status, expected);
        }
        println!("✓ Conditional requests consistent under concurrency");
    }
}

#[cfg(test)]
mod size_edge_case_tests {
    use super::*;

    #[test]
    fn test_empty_file() {
        let engine = archive_engine(&[("empty.txt", Vec::new())]);
        let req = Request::get("/empty.txt")
            .header(ACCEPT_ENCODING, "gzip")
            .body(())
            .unwrap();
        let res = send(&engine, req);
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[CONTENT_LENGTH], "0");
        assert!(res.headers().get(CONTENT_ENCODING).is_none());
        println!("✓ Empty file served as identity");
    }

    #[test]
    fn test_incompressible_content_stays_identity() {
        // A pseudo-random sequence gzip cannot shrink.
        let mut state: u32 = 0x1234_5678;
        let noise: Vec<u8> = (0..2048)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let engine = archive_engine(&[("noise.bin", noise.clone())]);
        let req = Request::get("/noise.bin")
            .header(ACCEPT_ENCODING, "gzip")
            .body(())
            .unwrap();
        let res = send(&engine, req);
        assert!(res.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(res.body().as_ref(), noise.as_slice());
        println!("✓ Compression kept only when smaller");
    }

    #[test]
    fn test_boundary_file_sizes() {
        let at_threshold = vec![b'a'; 1024];
        let below = vec![b'a'; 1023];
        let archive = EmbeddedArchive::new()
            .with_file("at.txt", at_threshold)
            .with_file("below.txt", below);
        let engine = StaticEngine::new(ServingConfig::archive(archive).with_codecs(&[Codec::Gzip]));

        let at = send(
            &engine,
            Request::get("/at.txt").header(ACCEPT_ENCODING, "gzip").body(()).unwrap(),
        );
        let below = send(
            &engine,
            Request::get("/below.txt").header(ACCEPT_ENCODING, "gzip").body(()).unwrap(),
        );
        assert_eq!(at.headers()[CONTENT_ENCODING], "gzip");
        assert!(below.headers().get(CONTENT_ENCODING).is_none());
        println!("✓ Threshold is inclusive");
    }
}

#[cfg(test)]
mod path_edge_case_tests {
    use super::*;

    #[test]
    fn test_unicode_and_spaces_in_names() {
        let engine = archive_engine(&[("docs/résumé final.txt", b"cv".to_vec())]);
        let res = send(
            &engine,
            Request::get("/docs/r%C3%A9sum%C3%A9%20final.txt").body(()).unwrap(),
        );
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"cv");
        println!("✓ Percent-encoded UTF-8 names resolve");
    }

    #[test]
    fn test_invalid_utf8_is_forbidden() {
        let engine = archive_engine(&[("a.txt", b"x".to_vec())]);
        let res = send(&engine, Request::get("/%FF%FE.txt").body(()).unwrap());
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        println!("✓ Undecodable paths rejected");
    }

    #[test]
    fn test_duplicate_slashes_and_dots() {
        let engine = archive_engine(&[("css/site.css", b"body{}".to_vec())]);
        for uri in ["//css//site.css", "/./css/./site.css", "/css/x/../site.css"] {
            let res = send(&engine, Request::get(uri).body(()).unwrap());
            assert_eq!(res.status(), StatusCode::OK, "{uri}");
        }
        println!("✓ Lexically equivalent paths share one entry");
        assert_eq!(engine.cache().unwrap().len(), 1);
    }

    #[test]
    fn test_extremely_long_path() {
        let engine = archive_engine(&[("a.txt", b"x".to_vec())]);
        let uri = format!("/{}x.txt", "a/".repeat(2000));
        let res = send(&engine, Request::get(uri.as_str()).body(()).unwrap());
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        println!("✓ Long paths handled");
    }
}
