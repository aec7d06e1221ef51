//! Router matching laws under generated inputs.

use http::Method;
use proptest::prelude::*;
use xypriss_router::Router;

fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,7}"
}

proptest! {
    /// Any literal pattern matches exactly its own path with no params.
    #[test]
    fn literal_pattern_matches_itself(segments in prop::collection::vec(segment(), 1..5)) {
        let pattern = format!("/{}", segments.join("/"));
        let mut router = Router::new();
        router.route(Method::GET, &pattern, "value").unwrap();

        let found = router.lookup(&Method::GET, &pattern).unwrap();
        prop_assert_eq!(*found.value, "value");
        prop_assert!(found.params.is_empty());
    }

    /// A `:param` pattern captures whatever sits in that segment.
    #[test]
    fn param_captures_any_segment(
        prefix in segment(),
        value in segment(),
    ) {
        let mut router = Router::new();
        router
            .route(Method::GET, &format!("/{prefix}/:x"), "p")
            .unwrap();

        let path = format!("/{prefix}/{value}");
        let found = router.lookup(&Method::GET, &path).unwrap();
        prop_assert_eq!(found.params.get("x").map(String::as_str), Some(value.as_str()));
    }

    /// Literal beats `:param`, which beats `*`, which beats `**`,
    /// regardless of registration order.
    #[test]
    fn precedence_is_independent_of_registration_order(
        head in segment(),
        tail in segment(),
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
    ) {
        let patterns = [
            (format!("/{head}/{tail}"), "literal"),
            (format!("/{head}/:x"), "param"),
            (format!("/{head}/*"), "wildcard"),
            (format!("/{head}/**"), "deep"),
        ];

        let mut router = Router::new();
        for index in order {
            let (pattern, label) = &patterns[index];
            router.route(Method::GET, pattern, *label).unwrap();
        }

        let found = router.lookup(&Method::GET, &format!("/{head}/{tail}")).unwrap();
        prop_assert_eq!(*found.value, "literal");

        // A path whose final segment matches no literal falls to :param.
        let other = format!("{tail}x");
        let found = router.lookup(&Method::GET, &format!("/{head}/{other}")).unwrap();
        prop_assert_eq!(*found.value, "param");

        // Two trailing segments can only be the deep wildcard.
        let found = router
            .lookup(&Method::GET, &format!("/{head}/{tail}/{tail}"))
            .unwrap();
        prop_assert_eq!(*found.value, "deep");
    }

    /// Paths that share no head segment with any pattern are NotFound.
    #[test]
    fn unrelated_paths_are_not_found(
        registered in segment(),
        probed in segment(),
    ) {
        prop_assume!(registered != probed);
        let mut router = Router::new();
        router
            .route(Method::GET, &format!("/{registered}/**"), "r")
            .unwrap();
        let probed_path = format!("/{}", probed);
        prop_assert!(router.lookup(&Method::GET, &probed_path).is_err());
    }
}
