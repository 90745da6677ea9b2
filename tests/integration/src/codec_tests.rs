//! Codec Tests - Pointer-heavy operations through the marshal pipeline
//!
//! These tests drive the catalog operation through the same entry points the
//! connection uses:
//! - Conformant arrays sized by a sibling count
//! - Unique strings, alone and as array elements
//! - Truncated and hostile stub data
//! - Re-encoding of decoded values

use integration_tests::*;
use msrpc_dcerpc::hresult::codes;
use msrpc_dcerpc::{
    marshal_request, marshal_response, unmarshal_request, unmarshal_response, Request, RpcError,
};
use msrpc_ndr::{Bytes, NdrContext, NdrError};

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn encode_list(list: ModuleList, ctx: NdrContext) -> Bytes {
    let mut op = ListModulesOperation {
        list,
        ..Default::default()
    };
    marshal_response(&mut op, ctx).unwrap()
}

fn decode_list(stub: Bytes, ctx: NdrContext) -> Result<ModuleList, RpcError> {
    let mut op = ListModulesOperation::default();
    unmarshal_response(&mut op, stub, ctx)?;
    Ok(op.list)
}

fn assert_bounds(err: RpcError) {
    match err {
        RpcError::Ndr(e) => assert!(e.is_bounds(), "expected a bounds error, got {:?}", e),
        other => panic!("expected NDR error, got {:?}", other),
    }
}

fn two_modules() -> ModuleList {
    ModuleList {
        modules_count: 2,
        module_flags: Some(vec![1, 2]),
        modules: Some(vec!["a.dll".to_string(), "b.dll".to_string()]),
        return_code: codes::S_OK,
    }
}

/// Test: A two-module listing decodes to exactly what was sent
#[test]
fn test_module_listing_roundtrip() {
    init_logging();

    let stub = encode_list(two_modules(), NdrContext::new());

    // count, two referents, flags body, modules body, two strings, return
    assert_eq!(stub.len(), 4 + 8 + 12 + 12 + 24 + 24 + 4);
    assert_eq!(u32_at(&stub, 0), 2);
    let flags_ref = u32_at(&stub, 4);
    let modules_ref = u32_at(&stub, 8);
    assert_ne!(flags_ref, 0);
    assert_ne!(modules_ref, 0);
    assert_ne!(flags_ref, modules_ref);
    // flags body: max_count then values
    assert_eq!(u32_at(&stub, 12), 2);
    assert_eq!(u32_at(&stub, 16), 1);
    assert_eq!(u32_at(&stub, 20), 2);
    // first string: 5 code units plus the terminator
    assert_eq!(u32_at(&stub, 36), 6);
    assert_eq!(u32_at(&stub, 40), 0);
    assert_eq!(u32_at(&stub, 44), 6);
    assert_eq!(u32_at(&stub, 84), 0);

    let decoded = decode_list(stub, NdrContext::new()).unwrap();
    assert_eq!(decoded, two_modules());
    assert_eq!(
        decoded.modules.as_ref().map(Vec::len),
        decoded.module_flags.as_ref().map(Vec::len)
    );
}

/// Test: Losing the last four bytes is a bounds error, not a partial result
#[test]
fn test_truncated_listing_is_rejected() {
    init_logging();

    let stub = encode_list(two_modules(), NdrContext::new());
    let err = decode_list(stub.slice(..stub.len() - 4), NdrContext::new()).unwrap_err();
    assert_bounds(err);

    // cut inside the second string's body
    let err = decode_list(stub.slice(..70), NdrContext::new()).unwrap_err();
    assert_bounds(err);
}

/// Test: An empty unique string is a null referent with no body
#[test]
fn test_empty_path_is_null_referent() {
    init_logging();

    let mut empty = ListModulesRequest(ModuleQuery::new("", 7)).into_operation();
    let stub = marshal_request(&mut empty, NdrContext::new()).unwrap();
    assert_eq!(stub.as_ref(), &[0, 0, 0, 0, 7, 0, 0, 0]);

    let mut named = ListModulesRequest(ModuleQuery::new("x", 7)).into_operation();
    let named_stub = marshal_request(&mut named, NdrContext::new()).unwrap();
    assert_ne!(u32_at(&named_stub, 0), 0);
    // referent, max/offset/actual, "x\0", limit
    assert_eq!(named_stub.len(), 4 + 12 + 4 + 4);

    let mut decoded = ListModulesOperation::default();
    decoded.query.path = "stale".to_string();
    unmarshal_request(&mut decoded, stub, NdrContext::new()).unwrap();
    assert_eq!(decoded.query, ModuleQuery::new("", 7));
}

/// Test: Empty names inside the module array travel as null referents too
#[test]
fn test_empty_module_name_in_array() {
    let list = ModuleList::new([("", 0u32), ("c.dll", 4)]);
    let stub = encode_list(list.clone(), NdrContext::new());
    // modules body: max_count, null referent, non-null referent
    assert_eq!(u32_at(&stub, 24), 2);
    assert_eq!(u32_at(&stub, 28), 0);
    assert_ne!(u32_at(&stub, 32), 0);

    let decoded = decode_list(stub, NdrContext::new()).unwrap();
    assert_eq!(decoded.modules, list.modules);
    assert_eq!(decoded.modules_count, 2);
}

/// Test: A missing array and an empty one differ on the wire
#[test]
fn test_null_and_empty_arrays_differ() {
    let empty = ModuleList::new(Vec::<(String, u32)>::new());
    let absent = ModuleList::failed(codes::E_INVALIDARG);

    let empty_stub = encode_list(empty.clone(), NdrContext::new());
    let absent_stub = encode_list(absent.clone(), NdrContext::new());
    assert_ne!(empty_stub, absent_stub);
    assert_eq!(absent_stub.len(), 16);

    assert_eq!(decode_list(empty_stub, NdrContext::new()).unwrap(), empty);
    assert_eq!(decode_list(absent_stub, NdrContext::new()).unwrap(), absent);
}

/// Test: The transmitted count follows the arrays, not the field
#[test]
fn test_count_is_derived_from_arrays() {
    let mut list = two_modules();
    list.modules_count = 40;
    let stub = encode_list(list, NdrContext::new());
    assert_eq!(u32_at(&stub, 0), 2);

    let mut mismatched = two_modules();
    mismatched.module_flags = Some(vec![1]);
    let mut op = ListModulesOperation {
        list: mismatched,
        ..Default::default()
    };
    assert!(matches!(
        marshal_response(&mut op, NdrContext::new()),
        Err(RpcError::Ndr(NdrError::ArraySizeMismatch { expected: 2, got: 1 }))
    ));
}

/// Test: Decoding then re-encoding gives the same bytes
#[test]
fn test_reencoding_is_byte_identical() {
    for ctx in [NdrContext::new(), NdrContext::big_endian()] {
        let list = catalog_listing(&ModuleQuery::new("C:\\Windows\\System32", 17));
        let first = encode_list(list, ctx);
        let decoded = decode_list(first.clone(), ctx).unwrap();
        let second = encode_list(decoded, ctx);
        assert_eq!(first, second);
    }
}

/// Test: Big-endian stub data decodes to the same listing
#[test]
fn test_big_endian_listing() {
    let stub = encode_list(two_modules(), NdrContext::big_endian());
    assert_eq!(&stub[0..4], &[0, 0, 0, 2]);
    assert_eq!(decode_list(stub, NdrContext::big_endian()).unwrap(), two_modules());
}

/// Test: Hostile conformance values fail before anything is allocated
#[test]
fn test_oversized_conformance_is_bounds_error() {
    init_logging();

    let mut stub = Vec::new();
    stub.extend_from_slice(&0x4000_0000u32.to_le_bytes()); // ModulesCount
    stub.extend_from_slice(&0x0002_0000u32.to_le_bytes()); // ModuleFlags referent
    stub.extend_from_slice(&0u32.to_le_bytes()); // Modules: null
    stub.extend_from_slice(&0x4000_0000u32.to_le_bytes()); // max_count
    stub.extend_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);

    let err = decode_list(Bytes::from(stub), NdrContext::new()).unwrap_err();
    assert!(matches!(
        err,
        RpcError::Ndr(NdrError::BoundsExceeded {
            count: 0x4000_0000,
            ..
        })
    ));
}

/// Test: An array whose conformance disagrees with ModulesCount is refused
#[test]
fn test_conformance_must_match_count() {
    let mut stub = encode_list(two_modules(), NdrContext::new()).to_vec();
    stub[0] = 3;
    let err = decode_list(Bytes::from(stub), NdrContext::new()).unwrap_err();
    assert!(matches!(
        err,
        RpcError::Ndr(NdrError::ArraySizeMismatch { expected: 3, got: 2 })
    ));
}
