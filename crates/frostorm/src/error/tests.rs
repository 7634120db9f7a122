use super::*;

#[test]
fn semantic_errors_map_to_query_kinds() {
    let err: Error = InternalError::semantic(SemanticError::UnknownEntity {
        name: "Invoice".into(),
    })
    .into();

    assert_eq!(err.kind, ErrorKind::Query(QueryErrorKind::UnknownName));
    assert_eq!(err.origin, ErrorOrigin::Compile);
    assert_eq!(err.to_string(), "unknown entity 'Invoice'");

    let err: Error = InternalError::semantic(SemanticError::Syntax {
        offset: 3,
        message: "expected FROM".into(),
    })
    .into();
    assert_eq!(err.kind, ErrorKind::Query(QueryErrorKind::Syntax));
}

#[test]
fn persistence_classes_keep_their_identity() {
    let err: Error = InternalError::not_found("Order", "(7)").into();

    assert!(err.is_not_found());
    assert!(!err.is_optimistic_lock());
    assert_eq!(err.origin, ErrorOrigin::Loader);

    let err: Error =
        InternalError::new(ErrorClass::OptimisticLock, CoreErrorOrigin::Writer, "stale").into();
    assert!(err.is_optimistic_lock());
}

#[test]
fn invariant_violations_are_internal() {
    let err: Error = InternalError::new(
        ErrorClass::InvariantViolation,
        CoreErrorOrigin::Context,
        "broken",
    )
    .into();

    assert_eq!(err.kind, ErrorKind::Internal);
    assert_eq!(err.origin, ErrorOrigin::Context);
}

#[test]
fn errors_serialize_with_kind_and_origin() {
    let err = Error::new(
        ErrorKind::Persistence(PersistenceErrorKind::Conflict),
        ErrorOrigin::Writer,
        "duplicate key",
    );

    let json = serde_json::to_string(&err).unwrap();
    assert_eq!(
        json,
        r#"{"kind":{"Persistence":"Conflict"},"origin":"Writer","message":"duplicate key"}"#
    );

    let back: Error = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
}
