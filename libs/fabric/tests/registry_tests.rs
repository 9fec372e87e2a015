mod common;

use switchboard_fabric::error::Error;
use switchboard_fabric::rpc::{
    Classification, EnumMeta, EnumValueMeta, FieldKind, FieldMeta, Meta, MethodKind, MethodMeta,
    Name, PrimitiveKind, ProtoRegistry, ServiceMeta, TypeMeta,
};

use common::{hello_meta, HELLO, SERVICE};

fn field(name: &str, id: u32, ty: &str, classification: Classification) -> FieldMeta {
    FieldMeta {
        name: name.to_string(),
        id,
        type_full_name: ty.to_string(),
        is_optional: false,
        is_repeated: false,
        part_of: None,
        classification,
    }
}

fn shapes_meta() -> Meta {
    let mut circle = field("circle", 2, ".geo.Circle", Classification::EmbeddedMessage);
    circle.part_of = Some("shape".to_string());
    let mut side = field("side", 3, "double", Classification::Primitive);
    side.part_of = Some("shape".to_string());
    let mut tags = field("tags", 4, "string", Classification::String);
    tags.is_repeated = true;

    Meta {
        services: Vec::new(),
        types: vec![
            TypeMeta {
                name: Name::new("geo", "Shape"),
                fields: vec![
                    field("color", 1, ".geo.Color", Classification::Enum),
                    circle,
                    side,
                    tags,
                ],
            },
            TypeMeta {
                name: Name::new("geo", "Circle"),
                fields: vec![field("radius", 1, "float", Classification::Primitive)],
            },
        ],
        enums: vec![EnumMeta {
            name: Name::new("geo", "Color"),
            fields: vec![
                EnumValueMeta {
                    name: "RED".to_string(),
                    value: 0,
                },
                EnumValueMeta {
                    name: "BLUE".to_string(),
                    value: 1,
                },
            ],
        }],
    }
}

#[test]
fn services_and_methods_are_indexed_by_full_name() {
    let registry = ProtoRegistry::from_meta(&hello_meta()).unwrap();

    let service = registry.lookup_service(SERVICE).unwrap();
    assert_eq!(service.methods.len(), 5);
    assert_eq!(registry.service_names(), vec![SERVICE.to_string()]);

    let hello = registry.lookup_method(HELLO).unwrap();
    assert_eq!(hello.service, SERVICE);
    assert_eq!(hello.request_type, "hello_world.HelloRequest");
    assert_eq!(hello.kind(), MethodKind::Unary);

    let kinds: Vec<_> = ["Count", "Join", "Shout"]
        .iter()
        .map(|name| service.method(name).unwrap().kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            MethodKind::ServerStreaming,
            MethodKind::ClientStreaming,
            MethodKind::BidiStreaming
        ]
    );
    assert!(registry.lookup_method(".hello_world.HelloService.Hello").is_some());
    assert!(registry.validate().is_ok());
}

#[test]
fn methods_match_snake_and_camel_case_names() {
    let mut meta = hello_meta();
    meta.services[0].methods.push(MethodMeta {
        name: "SayHello".to_string(),
        req_full_type_name: "hello_world.HelloRequest".to_string(),
        res_full_type_name: "hello_world.HelloReply".to_string(),
        is_req_streamed: false,
        is_res_streamed: false,
    });
    let registry = ProtoRegistry::from_meta(&meta).unwrap();
    let service = registry.lookup_service(SERVICE).unwrap();

    for name in ["SayHello", "say_hello", "sayHello"] {
        assert_eq!(service.method(name).unwrap().full_name, "hello_world.HelloService.SayHello");
    }
    assert!(service.method("say_goodbye").is_none());
}

#[test]
fn adding_a_known_name_keeps_the_first_descriptor() {
    let registry = ProtoRegistry::from_meta(&hello_meta()).unwrap();

    let mut changed = hello_meta();
    changed.services[0].methods.truncate(1);
    changed.types[0].fields.clear();
    registry.add_meta(&changed).unwrap();

    assert_eq!(registry.lookup_service(SERVICE).unwrap().methods.len(), 5);
    assert_eq!(
        registry
            .lookup_type("hello_world.HelloRequest")
            .unwrap()
            .fields
            .len(),
        1
    );
}

#[test]
fn fields_are_classified_and_one_ofs_rebuilt() {
    let registry = ProtoRegistry::from_meta(&shapes_meta()).unwrap();
    let shape = registry.lookup_type("geo.Shape").unwrap();

    assert_eq!(shape.field("color").unwrap().kind, FieldKind::Enum("geo.Color".to_string()));
    assert_eq!(
        shape.field("circle").unwrap().kind,
        FieldKind::Message("geo.Circle".to_string())
    );
    assert_eq!(
        shape.field("side").unwrap().kind,
        FieldKind::Primitive(PrimitiveKind::Double)
    );
    assert!(shape.field("tags").unwrap().repeated);
    assert_eq!(
        shape.one_ofs.get("shape"),
        Some(&vec!["circle".to_string(), "side".to_string()])
    );
    assert_eq!(registry.lookup_enum("geo.Color").unwrap().value("BLUE"), Some(1));
    assert!(registry.validate().is_ok());
}

#[test]
fn unknown_primitive_rejects_the_whole_meta() {
    let mut meta = shapes_meta();
    meta.types[1].fields[0].type_full_name = "int128".to_string();
    let registry = ProtoRegistry::new();

    match registry.add_meta(&meta) {
        Err(Error::Registry(msg)) => assert!(msg.contains("int128")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(registry.lookup_type("geo.Shape").is_none());
    assert!(registry.lookup_enum("geo.Color").is_none());
}

#[test]
fn validate_reports_dangling_references() {
    let mut meta = shapes_meta();
    meta.types.truncate(1);
    let registry = ProtoRegistry::from_meta(&meta).unwrap();

    match registry.validate() {
        Err(Error::Registry(msg)) => assert!(msg.contains("circle")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn base64_meta_is_ingested() {
    let blob = hello_meta().to_base64().unwrap();
    let registry = ProtoRegistry::new();
    registry.add_meta_base64(&blob).unwrap();
    registry.add_meta_base64(&blob).unwrap();

    assert!(registry.lookup_method(HELLO).is_some());
    assert!(matches!(
        registry.add_meta_base64("not base64!"),
        Err(Error::Registry(_))
    ));
}

#[test]
fn services_without_namespace_use_bare_names() {
    let meta = Meta {
        services: vec![ServiceMeta {
            name: Name::new("", "Echo"),
            methods: vec![MethodMeta {
                name: "Echo".to_string(),
                req_full_type_name: "Msg".to_string(),
                res_full_type_name: "Msg".to_string(),
                is_req_streamed: false,
                is_res_streamed: false,
            }],
        }],
        types: vec![TypeMeta {
            name: Name::new("", "Msg"),
            fields: Vec::new(),
        }],
        enums: Vec::new(),
    };
    let registry = ProtoRegistry::from_meta(&meta).unwrap();

    assert!(registry.lookup_method("Echo.Echo").is_some());
    assert!(registry.validate().is_ok());
}
